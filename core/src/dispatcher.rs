//! Applies the actions of one decision to the exec pane and the tool
//! registry.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::interaction::EventSink;
use crate::interaction::UserConfirmer;
use crate::mcp_connection_manager::McpConnectionManager;
use crate::protocol::ActionKind;
use crate::protocol::AgentAction;
use crate::protocol::AgentEvent;
use crate::protocol::ToolCall;
use crate::safety::CommandPolicy;
use crate::safety::SafetyCheck;
use crate::session_overrides::SessionOverrides;
use crate::tmux::PaneController;

/// Effective per-kind confirmation flags for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmFlags {
    pub send_keys: bool,
    pub exec: bool,
    pub paste: bool,
}

impl ConfirmFlags {
    pub fn resolve(overrides: &SessionOverrides, config: &Config) -> Self {
        Self {
            send_keys: overrides.confirm_required(ActionKind::SendKeys, config),
            exec: overrides.confirm_required(ActionKind::ExecCommand, config),
            paste: overrides.confirm_required(ActionKind::Paste, config),
        }
    }

    pub fn for_kind(self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::SendKeys => self.send_keys,
            ActionKind::ExecCommand => self.exec,
            ActionKind::Paste => self.paste,
        }
    }
}

/// Where and under which rules a decision is applied.
pub struct DispatchTarget<'a> {
    pub pane_id: &'a str,
    /// When set only tool calls run.
    pub pane_busy: bool,
    pub policy: &'a CommandPolicy,
    pub confirm: ConfirmFlags,
}

/// What happened while dispatching, fed back to the model.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// One entry per tool call, success or failure.
    pub tool_results: Vec<String>,
    /// Pane actions that were not sent, with the reason.
    pub skipped: Vec<String>,
    /// Pane actions that reached the pane.
    pub pane_actions_sent: usize,
}

impl DispatchReport {
    /// Synthetic context message for the next completion call, if anything
    /// worth reporting happened.
    pub fn context_message(&self) -> Option<String> {
        if self.tool_results.is_empty() && self.skipped.is_empty() {
            return None;
        }
        let mut out = String::new();
        for result in &self.tool_results {
            let _ = writeln!(out, "{result}\n");
        }
        for skipped in &self.skipped {
            let _ = writeln!(out, "{skipped}");
        }
        Some(out.trim_end().to_string())
    }
}

pub struct ActionDispatcher {
    panes: Arc<dyn PaneController>,
    confirmer: Arc<dyn UserConfirmer>,
    events: Arc<dyn EventSink>,
}

impl ActionDispatcher {
    pub fn new(
        panes: Arc<dyn PaneController>,
        confirmer: Arc<dyn UserConfirmer>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            panes,
            confirmer,
            events,
        }
    }

    /// Apply `actions` in dispatch order. A refused or failed action never
    /// stops the ones after it.
    pub async fn dispatch(
        &self,
        actions: &[AgentAction],
        target: &DispatchTarget<'_>,
        registry: &McpConnectionManager,
    ) -> DispatchReport {
        let mut ordered: Vec<&AgentAction> = actions.iter().collect();
        ordered.sort_by_key(|action| action.order());

        let mut report = DispatchReport::default();
        for action in ordered {
            let (kind, content) = match action {
                AgentAction::ToolCall(call) => {
                    let result = self.call_tool(call, registry).await;
                    report.tool_results.push(result);
                    continue;
                }
                AgentAction::SendKeys(content) => (ActionKind::SendKeys, content),
                AgentAction::ExecCommand(content) => (ActionKind::ExecCommand, content),
                AgentAction::Paste(content) => (ActionKind::Paste, content),
            };
            match self.run_pane_action(kind, content, target).await {
                Ok(()) => report.pane_actions_sent += 1,
                Err(reason) => {
                    report
                        .skipped
                        .push(format!("Skipped {kind} `{content}`: {reason}"));
                    self.events.emit(AgentEvent::ActionSkipped {
                        kind,
                        content: content.clone(),
                        reason,
                    });
                }
            }
        }
        report
    }

    async fn call_tool(&self, call: &ToolCall, registry: &McpConnectionManager) -> String {
        let arguments = Some(call.arguments.clone());
        match registry
            .call_tool(&call.server_name, &call.tool_name, arguments)
            .await
        {
            Ok(text) => {
                self.events.emit(AgentEvent::ToolResult {
                    server: call.server_name.clone(),
                    tool: call.tool_name.clone(),
                    text: text.clone(),
                    is_error: false,
                });
                format!(
                    "Result of tool {} on server {}:\n{text}",
                    call.tool_name, call.server_name
                )
            }
            Err(err) => {
                let text = err.to_string();
                self.events.emit(AgentEvent::ToolResult {
                    server: call.server_name.clone(),
                    tool: call.tool_name.clone(),
                    text: text.clone(),
                    is_error: true,
                });
                format!(
                    "Tool {} on server {} failed: {text}",
                    call.tool_name, call.server_name
                )
            }
        }
    }

    /// `Err` carries the reason the action did not reach the pane.
    async fn run_pane_action(
        &self,
        kind: ActionKind,
        content: &str,
        target: &DispatchTarget<'_>,
    ) -> std::result::Result<(), String> {
        if target.pane_busy {
            return Err("the exec pane is busy".to_string());
        }

        match target.policy.assess(content, target.confirm.for_kind(kind)) {
            SafetyCheck::Reject { reason } => {
                warn!("refused to {kind} `{content}`: {reason}");
                return Err(format!("refused, {reason}"));
            }
            SafetyCheck::AskUser => {
                if !self.confirmer.confirm(kind, content).await {
                    info!("user declined to {kind} `{content}`");
                    return Err("declined by user".to_string());
                }
            }
            SafetyCheck::AutoApprove => {}
        }

        debug!("{kind} on {}: {content}", target.pane_id);
        let pane = target.pane_id;
        let sent = match kind {
            ActionKind::SendKeys => self.panes.send_keys(pane, content, false),
            ActionKind::ExecCommand => self
                .panes
                .send_keys(pane, content, true)
                .and_then(|()| self.panes.send_keys(pane, "Enter", false)),
            ActionKind::Paste => self.panes.send_keys(pane, content, true),
        };
        sent.map_err(|err| {
            self.events.emit(AgentEvent::Error(err.to_string()));
            format!("failed: {err}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::mcp_connection_manager::McpTimeouts;
    use crate::protocol::PaneDetails;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPanes {
        sent: Mutex<Vec<(String, bool)>>,
    }

    impl PaneController for RecordingPanes {
        fn current_pane_id(&self) -> Result<String> {
            Ok("%1".to_string())
        }
        fn create_session(&self) -> Result<String> {
            Ok("%1".to_string())
        }
        fn create_adjacent_pane(&self, _pane_id: &str) -> Result<String> {
            Ok("%2".to_string())
        }
        fn select_pane(&self, _pane_id: &str) -> Result<()> {
            Ok(())
        }
        fn send_keys(&self, _pane_id: &str, keys: &str, literal: bool) -> Result<()> {
            self.sent.lock().unwrap().push((keys.to_string(), literal));
            Ok(())
        }
        fn capture(&self, _pane_id: &str, _max_lines: usize) -> Result<String> {
            Ok(String::new())
        }
        fn clear(&self, _pane_id: &str) -> Result<()> {
            Ok(())
        }
        fn attach(&self, _pane_id: &str) -> Result<()> {
            Ok(())
        }
        fn list_panes(&self, _pane_id: &str) -> Result<Vec<PaneDetails>> {
            Ok(Vec::new())
        }
        fn pane_current_command(&self, _pane_id: &str) -> Result<String> {
            Ok("bash".to_string())
        }
    }

    struct Answer(bool);

    #[async_trait]
    impl UserConfirmer for Answer {
        async fn confirm(&self, _kind: ActionKind, _content: &str) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<AgentEvent>>);

    impl EventSink for Events {
        fn emit(&self, event: AgentEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    const NO_CONFIRM: ConfirmFlags = ConfirmFlags {
        send_keys: false,
        exec: false,
        paste: false,
    };

    fn setup(answer: bool) -> (Arc<RecordingPanes>, Arc<Events>, ActionDispatcher) {
        let panes = Arc::new(RecordingPanes::default());
        let events = Arc::new(Events::default());
        let dispatcher = ActionDispatcher::new(panes.clone(), Arc::new(Answer(answer)), events.clone());
        (panes, events, dispatcher)
    }

    fn sent(panes: &RecordingPanes) -> Vec<(String, bool)> {
        panes.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn actions_run_in_fixed_order() {
        let (panes, _events, dispatcher) = setup(true);
        let registry = McpConnectionManager::empty(McpTimeouts::default());
        let policy = CommandPolicy::new(&[], &[]);
        let target = DispatchTarget {
            pane_id: "%2",
            pane_busy: false,
            policy: &policy,
            confirm: NO_CONFIRM,
        };
        let actions = vec![
            AgentAction::Paste("line1\nline2".to_string()),
            AgentAction::ExecCommand("ls".to_string()),
            AgentAction::SendKeys("C-c".to_string()),
        ];

        let report = dispatcher.dispatch(&actions, &target, &registry).await;

        assert_eq!(report.pane_actions_sent, 3);
        assert_eq!(
            sent(&panes),
            vec![
                ("C-c".to_string(), false),
                ("ls".to_string(), true),
                ("Enter".to_string(), false),
                ("line1\nline2".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn denied_command_is_reported_and_siblings_still_run() {
        let (panes, events, dispatcher) = setup(true);
        let registry = McpConnectionManager::empty(McpTimeouts::default());
        let policy = CommandPolicy::new(&["rm -rf".to_string()], &["rm -rf".to_string()]);
        let target = DispatchTarget {
            pane_id: "%2",
            pane_busy: false,
            policy: &policy,
            confirm: NO_CONFIRM,
        };
        let actions = vec![
            AgentAction::ExecCommand("rm -rf /tmp/x".to_string()),
            AgentAction::ExecCommand("echo ok".to_string()),
        ];

        let report = dispatcher.dispatch(&actions, &target, &registry).await;

        assert_eq!(
            sent(&panes),
            vec![("echo ok".to_string(), true), ("Enter".to_string(), false)]
        );
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].contains("blacklist"), "{:?}", report.skipped);
        assert!(events.0.lock().unwrap().iter().any(|event| matches!(
            event,
            AgentEvent::ActionSkipped { kind: ActionKind::ExecCommand, content, reason }
                if content == "rm -rf /tmp/x" && reason.contains("rm -rf")
        )));
    }

    #[tokio::test]
    async fn declined_confirmation_skips_action() {
        let (panes, _events, dispatcher) = setup(false);
        let registry = McpConnectionManager::empty(McpTimeouts::default());
        let policy = CommandPolicy::new(&[], &[]);
        let target = DispatchTarget {
            pane_id: "%2",
            pane_busy: false,
            policy: &policy,
            confirm: ConfirmFlags {
                send_keys: false,
                exec: true,
                paste: false,
            },
        };
        let actions = vec![
            AgentAction::ExecCommand("make".to_string()),
            AgentAction::SendKeys("q".to_string()),
        ];

        let report = dispatcher.dispatch(&actions, &target, &registry).await;

        assert_eq!(sent(&panes), vec![("q".to_string(), false)]);
        assert_eq!(report.skipped, vec!["Skipped execute `make`: declined by user"]);
    }

    #[tokio::test]
    async fn busy_pane_only_runs_tool_calls() {
        let (panes, events, dispatcher) = setup(true);
        let registry = McpConnectionManager::empty(McpTimeouts::default());
        let policy = CommandPolicy::new(&[], &[]);
        let target = DispatchTarget {
            pane_id: "%2",
            pane_busy: true,
            policy: &policy,
            confirm: NO_CONFIRM,
        };
        let actions = vec![
            AgentAction::ExecCommand("ls".to_string()),
            AgentAction::ToolCall(ToolCall {
                server_name: "missing".to_string(),
                tool_name: "echo".to_string(),
                arguments: serde_json::Map::new(),
            }),
        ];

        let report = dispatcher.dispatch(&actions, &target, &registry).await;

        assert!(sent(&panes).is_empty());
        assert_eq!(
            report.tool_results,
            vec!["Tool echo on server missing failed: MCP server 'missing' is not connected"]
        );
        let events = events.0.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(AgentEvent::ToolResult { is_error: true, .. })
        ));
        assert!(report.context_message().unwrap().contains("the exec pane is busy"));
    }

    #[tokio::test]
    async fn skipped_actions_report_their_own_kind() {
        let (_panes, events, dispatcher) = setup(true);
        let registry = McpConnectionManager::empty(McpTimeouts::default());
        let policy = CommandPolicy::new(&[], &[]);
        let target = DispatchTarget {
            pane_id: "%2",
            pane_busy: true,
            policy: &policy,
            confirm: NO_CONFIRM,
        };
        let actions = vec![
            AgentAction::Paste("a\nb".to_string()),
            AgentAction::ExecCommand("ls".to_string()),
            AgentAction::SendKeys("q".to_string()),
        ];

        let report = dispatcher.dispatch(&actions, &target, &registry).await;

        let kinds: Vec<ActionKind> = events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                AgentEvent::ActionSkipped { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![ActionKind::SendKeys, ActionKind::ExecCommand, ActionKind::Paste]
        );
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.pane_actions_sent, 0);
    }
}
