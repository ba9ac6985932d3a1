mod bootstrap;
mod cli;
pub mod config_override;
pub mod event_processor;
pub mod input;

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::Arc;

pub use bootstrap::relaunch_command;
pub use bootstrap::relaunch_in_tmux;
pub use cli::Cli;
use tmuxai_core::Agent;
use tmuxai_core::AgentDeps;
use tmuxai_core::ChatCompletionsClient;
use tmuxai_core::CompletionClient;
use tmuxai_core::Config;
use tmuxai_core::config::debug_dir;
use tmuxai_core::config::log_dir;
use tmuxai_core::debug_logger::DebugLogger;
use tmuxai_core::protocol::AgentEvent;
use tmuxai_core::slash_commands::CommandOutcome;
use tmuxai_core::slash_commands::handle_slash_command;
use tmuxai_core::slash_commands::is_slash_command;
use tmuxai_core::tmux::PaneController;
use tmuxai_core::tmux::TmuxCli;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toml::Value as TomlValue;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::event_processor::EventProcessor;
use crate::input::NextInput;
use crate::input::Terminal;
use crate::input::TerminalPrompter;
use crate::input::spawn_stdin_reader;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let mut cli_kv_overrides = match cli.config_overrides.parse_overrides() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error parsing -c overrides: {e}");
            std::process::exit(1);
        }
    };
    if cli.debug {
        cli_kv_overrides.push(("debug".to_string(), TomlValue::Boolean(true)));
    }
    if let Some(model) = &cli.model {
        cli_kv_overrides.push((
            "openrouter.model".to_string(),
            TomlValue::String(model.clone()),
        ));
    }

    let config = match Config::load_with_cli_overrides(cli_kv_overrides) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading configuration: {err}");
            std::process::exit(1);
        }
    };

    let debug_logger = if config.debug {
        DebugLogger::new(&debug_dir(&config))
    } else {
        DebugLogger::disabled()
    };
    let completion = match ChatCompletionsClient::new(&config.openrouter, debug_logger) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let _guard = init_logging(&config)?;

    let panes: Arc<dyn PaneController> = Arc::new(TmuxCli::default());
    if std::env::var_os("TMUX").is_none() {
        let command = relaunch_command(&std::env::current_exe()?, &cli)?;
        return relaunch_in_tmux(panes.as_ref(), &command, bootstrap::SHELL_STARTUP).await;
    }

    run_interactive(cli.prompt, config, Arc::new(completion), panes).await
}

/// Log to `<home>/log/tmuxai.log`. The returned guard flushes the writer
/// when dropped.
fn init_logging(config: &Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = log_dir(config);
    std::fs::create_dir_all(&log_dir)?;
    // Open (or create) the log file, appending to it.
    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // Only readable and writable by the current user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join("tmuxai.log"))?;
    let (non_blocking, guard) = non_blocking(log_file);

    let default_filter = if config.debug {
        "tmuxai_core=info,tmuxai_cli=info,tmuxai_rmcp_client=info"
    } else {
        "warn"
    };
    // RUST_LOG wins over the default.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    Ok(guard)
}

async fn run_interactive(
    initial_prompt: Option<String>,
    config: Config,
    completion: Arc<dyn CompletionClient>,
    panes: Arc<dyn PaneController>,
) -> anyhow::Result<()> {
    let events = Arc::new(EventProcessor::new(std::io::stdout().is_terminal()));
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let prompter = Arc::new(TerminalPrompter::new(request_tx));
    let deps = AgentDeps {
        completion,
        panes,
        events: Arc::clone(&events) as _,
        confirmer: Arc::clone(&prompter) as _,
        selector: prompter,
    };

    let mut agent = Agent::bootstrap(config, deps).await?;
    let mut terminal = Terminal::new(spawn_stdin_reader(), request_rx, Arc::clone(&events));
    agent.emit(AgentEvent::Info(
        "Type '/help' for a list of commands, '/exit' to quit.".to_string(),
    ));

    let mut pending = initial_prompt.filter(|prompt| !prompt.trim().is_empty());
    loop {
        let line = match pending.take() {
            Some(line) => line,
            None => match terminal.next_input().await {
                NextInput::Line(line) => line,
                NextInput::Eof | NextInput::Interrupted => break,
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !is_slash_command(line) {
            if terminal
                .drive(agent.process_user_message(line), None)
                .await
                .is_none()
            {
                break;
            }
            continue;
        }

        let Some(outcome) = terminal
            .drive(handle_slash_command(&mut agent, line), None)
            .await
        else {
            break;
        };
        match outcome {
            CommandOutcome::Continue => {}
            CommandOutcome::Exit => break,
            CommandOutcome::StartWatch(description) => {
                let cancel = CancellationToken::new();
                if terminal
                    .drive(agent.run_watch(&description, cancel.clone()), Some(&cancel))
                    .await
                    .is_none()
                {
                    break;
                }
            }
        }
    }

    info!("shutting down");
    agent.shutdown().await;
    Ok(())
}
