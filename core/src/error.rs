use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TmuxaiErr>;

#[derive(Error, Debug)]
pub enum TmuxaiErr {
    /// The completion request failed after all retries. The cycle is aborted
    /// and history is left as it was.
    #[error("completion service error: {0}")]
    CompletionService(String),

    /// A tmux call exited non-zero or could not be spawned.
    #[error("tmux pane unavailable: {0}")]
    PaneUnavailable(String),

    /// A command matched a deny pattern, or a config key outside the
    /// session allow-list was targeted.
    #[error("{0}")]
    PolicyViolation(String),

    #[error("MCP server '{0}' is not connected")]
    ToolNotFound(String),

    #[error("{operation} on MCP server '{server}' timed out after {timeout:?}")]
    ToolTimeout {
        server: String,
        operation: String,
        timeout: Duration,
    },

    /// The tool server answered with an error, or the call failed in
    /// transport. Carries the remote error text.
    #[error("tool error: {0}")]
    ToolError(String),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TmuxaiErr {
    /// Tool failures are fed back to the model; everything else ends the
    /// current cycle.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            TmuxaiErr::ToolNotFound(_) | TmuxaiErr::ToolTimeout { .. } | TmuxaiErr::ToolError(_)
        )
    }
}
