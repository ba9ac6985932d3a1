use clap::Parser;
use tmuxai_cli::Cli;
use tmuxai_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await
}
