//! The decision loop: capture the exec pane, ask the model, apply its
//! actions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chat_completions::CompletionClient;
use crate::config::Config;
use crate::context_manager::ContextManager;
use crate::dispatcher::ActionDispatcher;
use crate::dispatcher::ConfirmFlags;
use crate::dispatcher::DispatchTarget;
use crate::error::Result;
use crate::error::TmuxaiErr;
use crate::interaction::EventSink;
use crate::interaction::ServerSelector;
use crate::interaction::UserConfirmer;
use crate::mcp_connection_manager::McpConnectionManager;
use crate::mcp_connection_manager::McpTimeouts;
use crate::prompts;
use crate::prompts::SystemPromptContext;
use crate::protocol::AgentDecision;
use crate::protocol::AgentEvent;
use crate::protocol::AgentStatus;
use crate::protocol::ChatMessage;
use crate::protocol::CommandExecHistory;
use crate::response_parser::parse_decision;
use crate::safety::CommandPolicy;
use crate::session_overrides::SessionOverrides;
use crate::tmux::PaneController;
use crate::transcript::BASH_PROMPT;
use crate::transcript::PendingCommand;
use crate::transcript::ZSH_PROMPT;
use crate::transcript::is_prepared_capture;
use crate::transcript::parse_transcript;

/// Time the shell gets to redraw after its prompt was redefined.
const PREPARE_SETTLE: Duration = Duration::from_millis(500);

/// Collaborators the agent talks to.
#[derive(Clone)]
pub struct AgentDeps {
    pub completion: Arc<dyn CompletionClient>,
    pub panes: Arc<dyn PaneController>,
    pub events: Arc<dyn EventSink>,
    pub confirmer: Arc<dyn UserConfirmer>,
    pub selector: Arc<dyn ServerSelector>,
}

pub struct Agent {
    config: Config,
    overrides: SessionOverrides,
    status: AgentStatus,
    watch_mode: bool,
    history: Vec<ChatMessage>,
    exec_history: Vec<CommandExecHistory>,
    pending_command: Option<PendingCommand>,
    chat_pane_id: String,
    exec_pane_id: String,
    prepared: bool,
    /// Names of the configured servers selected for this session.
    active_servers: Vec<String>,
    registry: McpConnectionManager,
    policy: CommandPolicy,
    context: ContextManager,
    dispatcher: ActionDispatcher,
    completion: Arc<dyn CompletionClient>,
    panes: Arc<dyn PaneController>,
    events: Arc<dyn EventSink>,
    selector: Arc<dyn ServerSelector>,
}

impl Agent {
    pub fn new(
        config: Config,
        deps: AgentDeps,
        registry: McpConnectionManager,
        chat_pane_id: String,
        exec_pane_id: String,
    ) -> Self {
        let policy = CommandPolicy::new(&config.whitelist_patterns, &config.blacklist_patterns);
        let context = ContextManager::new(config.chars_per_token);
        let dispatcher = ActionDispatcher::new(
            Arc::clone(&deps.panes),
            Arc::clone(&deps.confirmer),
            Arc::clone(&deps.events),
        );
        let active_servers = config
            .mcp_servers
            .iter()
            .filter(|server| server.autoconnect)
            .map(|server| server.name.clone())
            .collect();
        Self {
            config,
            overrides: SessionOverrides::default(),
            status: AgentStatus::Idle,
            watch_mode: false,
            history: Vec::new(),
            exec_history: Vec::new(),
            pending_command: None,
            chat_pane_id,
            exec_pane_id,
            prepared: false,
            active_servers,
            registry,
            policy,
            context,
            dispatcher,
            completion: deps.completion,
            panes: deps.panes,
            events: deps.events,
            selector: deps.selector,
        }
    }

    /// Locate the chat pane, find or create the exec pane next to it and
    /// connect the tool servers marked `autoconnect`. The rest wait for the
    /// user to pick them.
    pub async fn bootstrap(config: Config, deps: AgentDeps) -> Result<Self> {
        let chat_pane_id = deps.panes.current_pane_id()?;
        let exec_pane_id = resolve_exec_pane(deps.panes.as_ref(), &chat_pane_id)?;
        info!("chat pane {chat_pane_id}, exec pane {exec_pane_id}");

        let autoconnect: Vec<_> = config
            .mcp_servers
            .iter()
            .filter(|server| server.autoconnect)
            .cloned()
            .collect();
        let waiting = config.mcp_servers.len() - autoconnect.len();
        let (registry, failures) =
            McpConnectionManager::new(autoconnect, McpTimeouts::from_config(&config)).await;
        for (name, err) in &failures {
            deps.events.emit(AgentEvent::Warning(format!(
                "MCP server {name} is unavailable: {err:#}"
            )));
        }
        if waiting > 0 {
            deps.events.emit(AgentEvent::Info(format!(
                "{waiting} MCP server(s) configured but not connected. Use '/mcp list' to select them."
            )));
        }

        Ok(Self::new(config, deps, registry, chat_pane_id, exec_pane_id))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn overrides(&self) -> &SessionOverrides {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut SessionOverrides {
        &mut self.overrides
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn watch_mode(&self) -> bool {
        self.watch_mode
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn exec_history(&self) -> &[CommandExecHistory] {
        &self.exec_history
    }

    pub fn chat_pane_id(&self) -> &str {
        &self.chat_pane_id
    }

    pub fn exec_pane_id(&self) -> &str {
        &self.exec_pane_id
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn registry(&self) -> &McpConnectionManager {
        &self.registry
    }

    pub fn active_servers(&self) -> &[String] {
        &self.active_servers
    }

    pub fn panes(&self) -> &dyn PaneController {
        self.panes.as_ref()
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn max_context_size(&self) -> usize {
        self.overrides.max_context_size(&self.config)
    }

    pub fn emit(&self, event: AgentEvent) {
        self.events.emit(event);
    }

    fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.events.emit(AgentEvent::StatusChanged {
            status,
            watch_mode: self.watch_mode,
        });
    }

    /// Run one decision cycle for a message typed by the user. Returns the
    /// decision, or `None` when the cycle was aborted.
    pub async fn process_user_message(&mut self, text: &str) -> Option<AgentDecision> {
        self.squash_if_needed().await;
        self.history.push(ChatMessage::user(text));
        self.run_cycle().await
    }

    /// Poll the exec pane every `wait_interval` seconds until `cancel` fires.
    /// Cancellation is observed between ticks.
    pub async fn run_watch(&mut self, description: &str, cancel: CancellationToken) {
        let instruction = prompts::watch_instruction(&self.config.prompts, description);
        self.watch_mode = true;
        self.events.emit(AgentEvent::Info(format!(
            "Watch mode started: {}",
            description.trim()
        )));
        info!("watch mode started: {description}");

        let mut tick: u64 = 0;
        while !cancel.is_cancelled() {
            tick += 1;
            debug!("watch tick {tick}");
            self.squash_if_needed().await;
            self.history.push(ChatMessage::user(instruction.clone()));
            let decision = self.run_cycle().await;
            if decision.is_some_and(|decision| decision.pane_seems_busy) {
                info!("exec pane busy on watch tick {tick}, waiting for the next one");
            }

            let interval = Duration::from_secs(self.overrides.wait_interval(&self.config).max(1));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.watch_mode = false;
        self.set_status(AgentStatus::Idle);
        self.events
            .emit(AgentEvent::Info("Watch mode stopped".to_string()));
        info!("watch mode stopped after {tick} ticks");
    }

    /// One full decision cycle over the current history.
    async fn run_cycle(&mut self) -> Option<AgentDecision> {
        self.set_status(AgentStatus::Running);

        let max_lines = self.overrides.max_capture_lines(&self.config);
        let capture = match self.panes.capture(&self.exec_pane_id, max_lines) {
            Ok(capture) => capture,
            Err(err) => {
                warn!("failed to capture exec pane: {err}");
                self.events.emit(AgentEvent::Error(err.to_string()));
                self.set_status(AgentStatus::Idle);
                return None;
            }
        };

        if !self.prepared && is_prepared_capture(&capture) {
            info!("exec pane already shows a prepared prompt");
            self.prepared = true;
        }
        if self.prepared {
            self.update_exec_history(&capture);
        }

        let servers = self.registry.tool_catalog().await;
        let system_prompt = prompts::system_prompt(
            &self.config.prompts,
            &SystemPromptContext {
                exec_pane_id: &self.exec_pane_id,
                prepared: self.prepared,
                exec_history: &self.exec_history,
                pending: self.pending_command.as_ref(),
                pane_content: &capture,
                servers: &servers,
            },
        );

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::assistant(system_prompt));
        messages.extend(self.history.iter().cloned());

        let response = match self
            .completion
            .generate(&messages, self.overrides.model())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("completion failed: {err}");
                self.events
                    .emit(AgentEvent::Error(format!("Failed to get a response: {err}")));
                self.set_status(AgentStatus::Idle);
                return None;
            }
        };

        self.history.push(ChatMessage::assistant(response.clone()));
        let decision = parse_decision(&response);
        for warning in &decision.warnings {
            self.events.emit(AgentEvent::Warning(warning.clone()));
        }
        if !decision.no_comment && !decision.message.is_empty() {
            self.events
                .emit(AgentEvent::AgentMessage(decision.message.clone()));
        }

        let target = DispatchTarget {
            pane_id: &self.exec_pane_id,
            pane_busy: decision.pane_seems_busy,
            policy: &self.policy,
            confirm: ConfirmFlags::resolve(&self.overrides, &self.config),
        };
        let report = self
            .dispatcher
            .dispatch(&decision.actions, &target, &self.registry)
            .await;
        if let Some(context) = report.context_message() {
            self.history.push(ChatMessage::user(context));
        }

        let status = if decision.request_accomplished {
            AgentStatus::Done
        } else if decision.waiting_for_user {
            AgentStatus::Waiting
        } else {
            AgentStatus::Idle
        };
        self.set_status(status);
        Some(decision)
    }

    fn update_exec_history(&mut self, capture: &str) {
        let parsed = parse_transcript(capture);
        debug!(
            "parsed {} commands from exec pane, pending: {}",
            parsed.records.len(),
            parsed.pending.is_some()
        );
        self.exec_history = parsed.records;
        self.pending_command = parsed.pending;
    }

    async fn squash_if_needed(&mut self) {
        let max = self.max_context_size();
        if !self.context.needs_squash(&self.history, max) {
            return;
        }
        info!(
            "context ~{} tokens exceeds {max}, squashing",
            self.context.history_tokens(&self.history)
        );
        self.squash().await;
    }

    /// Summarize the history into a single message. Failures leave the
    /// history as it was.
    pub async fn squash(&mut self) -> bool {
        let instruction = prompts::squash_instruction(&self.config.prompts).to_string();
        let model = self.overrides.model().map(str::to_string);
        match self
            .context
            .squash(
                &mut self.history,
                self.completion.as_ref(),
                model.as_deref(),
                &instruction,
            )
            .await
        {
            Ok(true) => {
                self.events
                    .emit(AgentEvent::Info("Chat history squashed".to_string()));
                true
            }
            Ok(false) => false,
            Err(err) => {
                self.events
                    .emit(AgentEvent::Error(format!("Failed to squash history: {err}")));
                false
            }
        }
    }

    /// Make sure the exec pane still exists, creating a new one next to the
    /// chat pane when it does not.
    pub fn init_exec_pane(&mut self) -> Result<()> {
        let panes = self.panes.list_panes(&self.chat_pane_id)?;
        if panes.iter().any(|pane| pane.id == self.exec_pane_id) {
            return Ok(());
        }
        self.exec_pane_id = resolve_exec_pane(self.panes.as_ref(), &self.chat_pane_id)?;
        self.prepared = false;
        Ok(())
    }

    /// Redefine the exec pane's shell prompt so its transcript can be parsed,
    /// then start over with an empty chat history.
    pub async fn prepare(&mut self) -> Result<()> {
        self.init_exec_pane()?;
        let pane = self.exec_pane_id.clone();
        let shell = self.panes.pane_current_command(&pane)?;
        let prompt = match shell_name(&shell) {
            "bash" => format!("export PS1='{BASH_PROMPT}'"),
            "zsh" => format!("export PROMPT='{ZSH_PROMPT}'"),
            other => {
                return Err(TmuxaiErr::PaneUnavailable(format!(
                    "shell `{other}` is not supported, use bash or zsh in the exec pane"
                )));
            }
        };

        self.panes.send_keys(&pane, &prompt, true)?;
        self.panes.send_keys(&pane, "Enter", false)?;
        tokio::time::sleep(PREPARE_SETTLE).await;
        self.panes.clear(&pane)?;

        self.prepared = true;
        self.history.clear();
        let max_lines = self.overrides.max_capture_lines(&self.config);
        let capture = self.panes.capture(&pane, max_lines)?;
        self.update_exec_history(&capture);
        info!("prepared exec pane {pane} ({shell})");
        Ok(())
    }

    /// Drop the chat history.
    pub fn clear(&mut self) {
        self.history.clear();
        self.events.emit(AgentEvent::ClearScreen);
    }

    /// Drop the chat history and clear the exec pane.
    pub fn reset(&mut self) -> Result<()> {
        self.history.clear();
        self.exec_history.clear();
        self.pending_command = None;
        self.set_status(AgentStatus::Idle);
        self.events.emit(AgentEvent::ClearScreen);
        self.panes.clear(&self.exec_pane_id)
    }

    /// Let the user choose which configured servers stay connected, then
    /// swap the registry over to that subset. Returns `false` when the
    /// selection was cancelled.
    pub async fn select_servers(&mut self) -> bool {
        let candidates: Vec<String> = self
            .config
            .mcp_servers
            .iter()
            .map(|server| server.name.clone())
            .collect();
        let Some(chosen) = self.selector.select(&candidates, &self.active_servers).await else {
            return false;
        };

        let specs: Vec<_> = chosen
            .iter()
            .filter_map(|name| self.config.find_mcp_server(name).cloned())
            .collect();
        self.active_servers = specs.iter().map(|spec| spec.name.clone()).collect();

        let failures = self.registry.replace(specs).await;
        for (name, err) in &failures {
            self.events.emit(AgentEvent::Warning(format!(
                "MCP server {name} is unavailable: {err:#}"
            )));
        }
        true
    }

    /// Close every tool server connection.
    pub async fn shutdown(&self) {
        self.registry.close().await;
    }
}

/// First other pane in the chat pane's window, or a new one split off it.
pub fn resolve_exec_pane(panes: &dyn PaneController, chat_pane_id: &str) -> Result<String> {
    let existing = panes.list_panes(chat_pane_id)?;
    if let Some(pane) = existing.iter().find(|pane| pane.id != chat_pane_id) {
        return Ok(pane.id.clone());
    }
    let pane = panes.create_adjacent_pane(chat_pane_id)?;
    panes.select_pane(chat_pane_id)?;
    Ok(pane)
}

/// `-zsh` and `/bin/zsh` are both `zsh`.
fn shell_name(command: &str) -> &str {
    let command = command.trim().trim_start_matches('-');
    command.rsplit('/').next().unwrap_or(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shell_names_are_normalized() {
        assert_eq!(shell_name("-zsh"), "zsh");
        assert_eq!(shell_name("/bin/bash\n"), "bash");
        assert_eq!(shell_name("fish"), "fish");
    }
}
