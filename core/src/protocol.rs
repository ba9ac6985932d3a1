//! Data shared between the agent loop, the dispatcher and the front end.

use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
    pub from_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: true,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_user: false,
            timestamp: Utc::now(),
        }
    }
}

/// One shell command read back from a prepared exec pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecHistory {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCall {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A single side effect requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    ToolCall(ToolCall),
    SendKeys(String),
    ExecCommand(String),
    Paste(String),
}

impl AgentAction {
    /// Dispatch rank: tool calls first, then keys, commands and pastes.
    pub fn order(&self) -> u8 {
        match self {
            AgentAction::ToolCall(_) => 0,
            AgentAction::SendKeys(_) => 1,
            AgentAction::ExecCommand(_) => 2,
            AgentAction::Paste(_) => 3,
        }
    }
}

/// Pane actions gated by the confirmation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SendKeys,
    ExecCommand,
    Paste,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::SendKeys => "send keys",
            ActionKind::ExecCommand => "execute",
            ActionKind::Paste => "paste",
        };
        f.write_str(label)
    }
}

/// The parsed answer of one completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentDecision {
    /// Text outside of any action tag.
    pub message: String,
    /// Kept in dispatch order.
    pub actions: Vec<AgentAction>,
    pub request_accomplished: bool,
    pub pane_seems_busy: bool,
    pub waiting_for_user: bool,
    pub no_comment: bool,
    /// Problems found while parsing, shown to the user.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Waiting,
    Done,
}

impl AgentStatus {
    pub fn symbol(self) -> &'static str {
        match self {
            AgentStatus::Idle => "",
            AgentStatus::Running => "▶",
            AgentStatus::Waiting => "?",
            AgentStatus::Done => "✓",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaneDetails {
    pub id: String,
    pub current_command: String,
    pub is_active: bool,
    pub width: u32,
    pub height: u32,
}

/// Tools a connected server advertised when it was brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTools {
    pub name: String,
    pub tools: Vec<String>,
}

/// Everything the agent wants the user to see.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The model's comment for this cycle.
    AgentMessage(String),
    Info(String),
    Warning(String),
    Error(String),
    ToolResult {
        server: String,
        tool: String,
        text: String,
        is_error: bool,
    },
    /// A pane action was skipped, with the reason.
    ActionSkipped {
        kind: ActionKind,
        content: String,
        reason: String,
    },
    StatusChanged {
        status: AgentStatus,
        watch_mode: bool,
    },
    ClearScreen,
}
