use std::io::Write;
use std::sync::Mutex;

use owo_colors::OwoColorize;
use owo_colors::Style;
use tmuxai_core::interaction::EventSink;
use tmuxai_core::protocol::AgentEvent;
use tmuxai_core::protocol::AgentStatus;

/// Lines of a tool result echoed to the chat pane. The model sees all of it.
const TOOL_RESULT_PREVIEW_LINES: usize = 5;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Prints agent events to the chat pane.
pub struct EventProcessor {
    with_ansi: bool,
    state: Mutex<PromptState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PromptState {
    status: AgentStatus,
    watch_mode: bool,
}

impl EventProcessor {
    pub fn new(with_ansi: bool) -> Self {
        Self {
            with_ansi,
            state: Mutex::new(PromptState::default()),
        }
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.with_ansi {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    /// Text printed for `event`, or `None` when it only updates state.
    pub fn render(&self, event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::AgentMessage(message) => Some(message.trim_end().to_string()),
            AgentEvent::Info(text) => Some(text.clone()),
            AgentEvent::Warning(text) => Some(self.paint(text, Style::new().yellow())),
            AgentEvent::Error(text) => {
                Some(self.paint(&format!("Error: {text}"), Style::new().red().bold()))
            }
            AgentEvent::ToolResult {
                server,
                tool,
                text,
                is_error,
            } => {
                let header = if *is_error {
                    self.paint(&format!("{server}/{tool} failed:"), Style::new().red().bold())
                } else {
                    self.paint(&format!("{server}/{tool}:"), Style::new().green().bold())
                };
                let preview = text
                    .lines()
                    .take(TOOL_RESULT_PREVIEW_LINES)
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(format!("{header}\n{}", self.paint(&preview, Style::new().dimmed())))
            }
            AgentEvent::ActionSkipped {
                kind,
                content,
                reason,
            } => Some(self.paint(
                &format!("Skipped {kind} `{content}`: {reason}"),
                Style::new().yellow(),
            )),
            AgentEvent::StatusChanged { status, watch_mode } => {
                if let Ok(mut state) = self.state.lock() {
                    *state = PromptState {
                        status: *status,
                        watch_mode: *watch_mode,
                    };
                }
                None
            }
            AgentEvent::ClearScreen => None,
        }
    }

    /// The input prompt, reflecting the last status the agent reported.
    pub fn prompt(&self) -> String {
        let state = self.state.lock().map(|s| *s).unwrap_or_default();
        let mut label = "TmuxAI".to_string();
        if state.watch_mode {
            label.push_str(" [W]");
        }
        let symbol = state.status.symbol();
        if !symbol.is_empty() {
            label.push(' ');
            label.push_str(symbol);
        }
        format!("{} » ", self.paint(&label, Style::new().cyan().bold()))
    }

    pub fn print_prompt(&self) {
        print!("{}", self.prompt());
        let _ = std::io::stdout().flush();
    }
}

impl EventSink for EventProcessor {
    fn emit(&self, event: AgentEvent) {
        if event == AgentEvent::ClearScreen {
            print!("{CLEAR_SCREEN}");
            let _ = std::io::stdout().flush();
            return;
        }
        if let Some(text) = self.render(&event) {
            println!("{text}");
        }
    }
}
