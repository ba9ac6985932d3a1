use clap::Parser;

use crate::config_override::CliConfigOverrides;

/// Command-line interface for the `tmuxai` terminal assistant.
#[derive(Debug, Parser, Clone, Default)]
#[command(
    author,
    version,
    about = "AI assistant that lives next to your shell in tmux."
)]
pub struct Cli {
    /// Message to send as soon as the session starts.
    pub prompt: Option<String>,

    /// Write every completion exchange to ~/.config/tmuxai/debug and log
    /// at info level.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Override the OpenRouter model from config.toml.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,
}

impl Cli {
    /// The opposite of clap: turn a parsed `Cli` back into argv so the
    /// process can relaunch itself inside a new tmux session.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.debug {
            args.push("--debug".into());
        }

        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }

        args.extend(self.config_overrides.to_args());

        if let Some(prompt) = &self.prompt {
            args.push(prompt.clone());
        }

        args
    }
}
