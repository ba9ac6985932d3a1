#![allow(clippy::unwrap_used, dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tmuxai_core::Agent;
use tmuxai_core::AgentDeps;
use tmuxai_core::CompletionClient;
use tmuxai_core::Config;
use tmuxai_core::Result;
use tmuxai_core::TmuxaiErr;
use tmuxai_core::interaction::EventSink;
use tmuxai_core::interaction::ServerSelector;
use tmuxai_core::interaction::UserConfirmer;
use tmuxai_core::mcp_connection_manager::McpConnectionManager;
use tmuxai_core::mcp_connection_manager::McpTimeouts;
use tmuxai_core::protocol::ActionKind;
use tmuxai_core::protocol::AgentEvent;
use tmuxai_core::protocol::ChatMessage;
use tmuxai_core::protocol::PaneDetails;
use tmuxai_core::tmux::PaneController;
use tokio_util::sync::CancellationToken;

pub const CHAT_PANE: &str = "%1";
pub const EXEC_PANE: &str = "%2";

/// Answers completion calls from a script and records every request.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    /// Cancelled once this many calls have been answered.
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedCompletion {
    pub fn new(replies: &[&str]) -> Self {
        let script = Self::default();
        for reply in replies {
            script.push_ok(reply);
        }
        script
    }

    pub fn push_ok(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn generate(&self, messages: &[ChatMessage], _model: Option<&str>) -> Result<String> {
        let calls = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(messages.to_vec());
            requests.len()
        };
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if calls >= *after {
                token.cancel();
            }
        }
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(TmuxaiErr::CompletionService(message)),
            None => Err(TmuxaiErr::CompletionService("script exhausted".to_string())),
        }
    }
}

/// Two-pane window: the chat pane and the exec pane.
pub struct FakePanes {
    pub capture: Mutex<String>,
    pub shell: Mutex<String>,
    pub sent: Mutex<Vec<(String, String, bool)>>,
    pub cleared: Mutex<Vec<String>>,
    pub fail_capture: Mutex<bool>,
}

impl Default for FakePanes {
    fn default() -> Self {
        Self {
            capture: Mutex::new("$ ".to_string()),
            shell: Mutex::new("bash".to_string()),
            sent: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            fail_capture: Mutex::new(false),
        }
    }
}

impl FakePanes {
    /// `(keys, literal)` sent to the exec pane.
    pub fn sent_to_exec(&self) -> Vec<(String, bool)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(pane, _, _)| pane == EXEC_PANE)
            .map(|(_, keys, literal)| (keys.clone(), *literal))
            .collect()
    }
}

impl PaneController for FakePanes {
    fn current_pane_id(&self) -> Result<String> {
        Ok(CHAT_PANE.to_string())
    }

    fn create_session(&self) -> Result<String> {
        Ok(CHAT_PANE.to_string())
    }

    fn create_adjacent_pane(&self, _pane_id: &str) -> Result<String> {
        Ok(EXEC_PANE.to_string())
    }

    fn select_pane(&self, _pane_id: &str) -> Result<()> {
        Ok(())
    }

    fn send_keys(&self, pane_id: &str, keys: &str, literal: bool) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((pane_id.to_string(), keys.to_string(), literal));
        Ok(())
    }

    fn capture(&self, _pane_id: &str, _max_lines: usize) -> Result<String> {
        if *self.fail_capture.lock().unwrap() {
            return Err(TmuxaiErr::PaneUnavailable("pane is gone".to_string()));
        }
        Ok(self.capture.lock().unwrap().clone())
    }

    fn clear(&self, pane_id: &str) -> Result<()> {
        self.cleared.lock().unwrap().push(pane_id.to_string());
        Ok(())
    }

    fn attach(&self, _pane_id: &str) -> Result<()> {
        Ok(())
    }

    fn list_panes(&self, _pane_id: &str) -> Result<Vec<PaneDetails>> {
        Ok(vec![
            PaneDetails {
                id: CHAT_PANE.to_string(),
                current_command: "tmuxai".to_string(),
                is_active: true,
                width: 80,
                height: 40,
            },
            PaneDetails {
                id: EXEC_PANE.to_string(),
                current_command: self.shell.lock().unwrap().clone(),
                is_active: false,
                width: 80,
                height: 40,
            },
        ])
    }

    fn pane_current_command(&self, _pane_id: &str) -> Result<String> {
        Ok(self.shell.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<AgentEvent>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|event| match event {
                AgentEvent::Info(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|event| match event {
                AgentEvent::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FixedAnswer(pub bool);

#[async_trait]
impl UserConfirmer for FixedAnswer {
    async fn confirm(&self, _kind: ActionKind, _content: &str) -> bool {
        self.0
    }
}

/// Returns a fixed selection and records what it was offered.
#[derive(Default)]
pub struct FixedSelection {
    pub choice: Option<Vec<String>>,
    pub offered: Mutex<Vec<(Vec<String>, Vec<String>)>>,
}

#[async_trait]
impl ServerSelector for FixedSelection {
    async fn select(&self, candidates: &[String], preselected: &[String]) -> Option<Vec<String>> {
        self.offered
            .lock()
            .unwrap()
            .push((candidates.to_vec(), preselected.to_vec()));
        self.choice.clone()
    }
}

pub struct Harness {
    pub agent: Agent,
    pub completion: Arc<ScriptedCompletion>,
    pub panes: Arc<FakePanes>,
    pub events: Arc<RecordingEvents>,
    pub selector: Arc<FixedSelection>,
}

/// Config with confirmations off so actions reach the pane unprompted.
pub fn quiet_config() -> Config {
    Config {
        send_keys_confirm: false,
        exec_confirm: false,
        paste_multiline_confirm: false,
        ..Config::default()
    }
}

pub fn harness(config: Config, completion: ScriptedCompletion) -> Harness {
    harness_with_selector(config, completion, FixedSelection::default())
}

pub fn harness_with_selector(
    config: Config,
    completion: ScriptedCompletion,
    selector: FixedSelection,
) -> Harness {
    let completion = Arc::new(completion);
    let panes = Arc::new(FakePanes::default());
    let events = Arc::new(RecordingEvents::default());
    let selector = Arc::new(selector);
    let deps = AgentDeps {
        completion: completion.clone(),
        panes: panes.clone(),
        events: events.clone(),
        confirmer: Arc::new(FixedAnswer(true)),
        selector: selector.clone(),
    };
    let registry = McpConnectionManager::empty(McpTimeouts::default());
    let agent = Agent::new(
        config,
        deps,
        registry,
        CHAT_PANE.to_string(),
        EXEC_PANE.to_string(),
    );
    Harness {
        agent,
        completion,
        panes,
        events,
        selector,
    }
}
