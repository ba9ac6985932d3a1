//! Seams between the agent and whatever front end is driving it.

use async_trait::async_trait;

use crate::protocol::ActionKind;
use crate::protocol::AgentEvent;

/// Receives everything the agent wants to show. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

#[async_trait]
pub trait UserConfirmer: Send + Sync {
    /// Ask whether `content` may be sent to the exec pane as `kind`.
    async fn confirm(&self, kind: ActionKind, content: &str) -> bool;
}

#[async_trait]
pub trait ServerSelector: Send + Sync {
    /// Let the user pick tool servers out of `candidates`. `None` means the
    /// prompt was cancelled and the current selection stays.
    async fn select(&self, candidates: &[String], preselected: &[String]) -> Option<Vec<String>>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AgentEvent) {}
}
