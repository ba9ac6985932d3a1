//! Terminal input for the chat pane.
//!
//! Stdin is read by a single task. The agent asks for confirmations and
//! server selections through [`TerminalPrompter`], which forwards each
//! question as an [`InputRequest`] to the main loop; the main loop owns the
//! line stream and answers from it, so a prompt and the chat never compete
//! for the same line.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tmuxai_core::interaction::ServerSelector;
use tmuxai_core::interaction::UserConfirmer;
use tmuxai_core::protocol::ActionKind;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event_processor::EventProcessor;

pub enum InputRequest {
    Confirm {
        prompt: String,
        reply: oneshot::Sender<bool>,
    },
    Select {
        candidates: Vec<String>,
        preselected: Vec<String>,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
}

/// Confirmation and selection front end handed to the agent.
#[derive(Clone)]
pub struct TerminalPrompter {
    requests: mpsc::UnboundedSender<InputRequest>,
}

impl TerminalPrompter {
    pub fn new(requests: mpsc::UnboundedSender<InputRequest>) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl UserConfirmer for TerminalPrompter {
    async fn confirm(&self, kind: ActionKind, content: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = InputRequest::Confirm {
            prompt: confirm_prompt(kind, content),
            reply,
        };
        if self.requests.send(request).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[async_trait]
impl ServerSelector for TerminalPrompter {
    async fn select(&self, candidates: &[String], preselected: &[String]) -> Option<Vec<String>> {
        let (reply, answer) = oneshot::channel();
        let request = InputRequest::Select {
            candidates: candidates.to_vec(),
            preselected: preselected.to_vec(),
            reply,
        };
        self.requests.send(request).ok()?;
        answer.await.ok().flatten()
    }
}

pub fn confirm_prompt(kind: ActionKind, content: &str) -> String {
    match kind {
        ActionKind::ExecCommand => format!("Execute this command? `{content}` [Y/n] "),
        ActionKind::SendKeys => format!("Send these keys? `{content}` [Y/n] "),
        ActionKind::Paste => format!("Paste this content?\n{content}\n[Y/n] "),
    }
}

/// Empty input accepts, like the `[Y/n]` default suggests.
pub fn parse_confirmation(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}

#[derive(Debug, PartialEq, Eq)]
pub enum SelectionStep {
    Continue,
    Confirm(Vec<String>),
    Cancel,
    Invalid(String),
}

/// Checklist over the configured servers, driven one input line at a time.
#[derive(Debug)]
pub struct SelectionState {
    candidates: Vec<String>,
    selected: Vec<bool>,
}

impl SelectionState {
    pub fn new(candidates: &[String], preselected: &[String]) -> Self {
        Self {
            candidates: candidates.to_vec(),
            selected: candidates
                .iter()
                .map(|name| preselected.contains(name))
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Select MCP servers:\n");
        for (index, (name, selected)) in self.candidates.iter().zip(&self.selected).enumerate() {
            let mark = if *selected { "✓" } else { " " };
            out.push_str(&format!("  [{mark}] {}. {name}\n", index + 1));
        }
        out.push_str("Numbers toggle, a = all, n = none, Enter confirms, q cancels: ");
        out
    }

    pub fn apply(&mut self, line: &str) -> SelectionStep {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => return SelectionStep::Confirm(self.selection()),
            "q" | "quit" => return SelectionStep::Cancel,
            "a" | "all" => {
                self.selected.iter_mut().for_each(|s| *s = true);
                return SelectionStep::Continue;
            }
            "n" | "none" => {
                self.selected.iter_mut().for_each(|s| *s = false);
                return SelectionStep::Continue;
            }
            _ => {}
        }

        let mut indices = Vec::new();
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            match token.parse::<usize>() {
                Ok(n) if (1..=self.candidates.len()).contains(&n) => indices.push(n - 1),
                _ => return SelectionStep::Invalid(format!("Not a server number: {token}")),
            }
        }
        for index in indices {
            self.selected[index] = !self.selected[index];
        }
        SelectionStep::Continue
    }

    fn selection(&self) -> Vec<String> {
        self.candidates
            .iter()
            .zip(&self.selected)
            .filter(|(_, selected)| **selected)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Spawn the task that reads stdin line by line. The channel closes on EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("stdin closed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

/// Owns the chat pane's input while the agent works.
pub struct Terminal {
    lines: mpsc::UnboundedReceiver<String>,
    requests: mpsc::UnboundedReceiver<InputRequest>,
    queued: VecDeque<String>,
    events: Arc<EventProcessor>,
    eof: bool,
    interrupted: bool,
}

pub enum NextInput {
    Line(String),
    Eof,
    Interrupted,
}

impl Terminal {
    pub fn new(
        lines: mpsc::UnboundedReceiver<String>,
        requests: mpsc::UnboundedReceiver<InputRequest>,
        events: Arc<EventProcessor>,
    ) -> Self {
        Self {
            lines,
            requests,
            queued: VecDeque::new(),
            events,
            eof: false,
            interrupted: false,
        }
    }

    /// Next chat line, either typed earlier while the agent was busy or read
    /// now.
    pub async fn next_input(&mut self) -> NextInput {
        if self.interrupted {
            return NextInput::Interrupted;
        }
        if let Some(line) = self.queued.pop_front() {
            return NextInput::Line(line);
        }
        if self.eof {
            return NextInput::Eof;
        }
        self.events.print_prompt();
        match self.read_reply().await {
            Some(line) => NextInput::Line(line),
            None if self.interrupted => NextInput::Interrupted,
            None => NextInput::Eof,
        }
    }

    /// Run `fut` to completion while answering the agent's questions. Any
    /// other line typed meanwhile is queued and, when `cancel` is given,
    /// cancels it. Returns `None` when interrupted with Ctrl-C.
    pub async fn drive<F: Future>(
        &mut self,
        fut: F,
        cancel: Option<&CancellationToken>,
    ) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            if self.interrupted {
                return None;
            }
            tokio::select! {
                biased;
                output = &mut fut => return Some(output),
                Some(request) = self.requests.recv() => self.answer(request).await,
                line = self.lines.recv(), if !self.eof => {
                    match line {
                        Some(line) => self.queued.push_back(line),
                        None => self.eof = true,
                    }
                    if let Some(token) = cancel {
                        token.cancel();
                    }
                }
                _ = tokio::signal::ctrl_c() => self.interrupted = true,
            }
        }
    }

    async fn answer(&mut self, request: InputRequest) {
        match request {
            InputRequest::Confirm { prompt, reply } => {
                self.print_inline(&prompt);
                let accepted = self
                    .read_reply()
                    .await
                    .is_some_and(|line| parse_confirmation(&line));
                let _ = reply.send(accepted);
            }
            InputRequest::Select {
                candidates,
                preselected,
                reply,
            } => {
                let mut state = SelectionState::new(&candidates, &preselected);
                let choice = loop {
                    self.print_inline(&state.render());
                    let Some(line) = self.read_reply().await else {
                        break None;
                    };
                    match state.apply(&line) {
                        SelectionStep::Continue => {}
                        SelectionStep::Confirm(selection) => break Some(selection),
                        SelectionStep::Cancel => break None,
                        SelectionStep::Invalid(message) => println!("{message}"),
                    }
                };
                let _ = reply.send(choice);
            }
        }
    }

    /// One line from stdin, or `None` on EOF or Ctrl-C.
    async fn read_reply(&mut self) -> Option<String> {
        if self.eof {
            return None;
        }
        tokio::select! {
            line = self.lines.recv() => {
                if line.is_none() {
                    self.eof = true;
                }
                line
            }
            _ = tokio::signal::ctrl_c() => {
                self.interrupted = true;
                None
            }
        }
    }

    fn print_inline(&self, text: &str) {
        use std::io::Write;
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}
