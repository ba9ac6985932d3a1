//! Engine of the tmux-resident assistant.
//!
//! The [`agent::Agent`] captures the exec pane, asks the completion service
//! for a decision and applies the resulting actions through the
//! [`dispatcher`]. Tool calls go through the [`mcp_connection_manager`].

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output goes through an `EventSink`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod agent;
pub mod chat_completions;
pub mod config;
pub mod config_types;
pub mod context_manager;
pub mod debug_logger;
pub mod dispatcher;
pub mod error;
pub mod interaction;
pub mod mcp_connection_manager;
pub mod prompts;
pub mod protocol;
pub mod response_parser;
pub mod safety;
pub mod session_overrides;
pub mod slash_commands;
pub mod tmux;
pub mod transcript;
mod util;

pub use agent::Agent;
pub use agent::AgentDeps;
pub use chat_completions::ChatCompletionsClient;
pub use chat_completions::CompletionClient;
pub use config::Config;
pub use error::Result;
pub use error::TmuxaiErr;
