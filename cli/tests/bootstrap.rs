#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use pretty_assertions::assert_eq;
use tmuxai_cli::Cli;
use tmuxai_cli::relaunch_command;
use tmuxai_cli::relaunch_in_tmux;
use tmuxai_core::Result;
use tmuxai_core::protocol::PaneDetails;
use tmuxai_core::tmux::PaneController;

#[derive(Default)]
struct RecordingTmux {
    calls: Mutex<Vec<String>>,
}

impl RecordingTmux {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PaneController for RecordingTmux {
    fn current_pane_id(&self) -> Result<String> {
        unreachable!("not inside tmux")
    }

    fn create_session(&self) -> Result<String> {
        self.record("new-session".to_string());
        Ok("%0".to_string())
    }

    fn create_adjacent_pane(&self, pane_id: &str) -> Result<String> {
        self.record(format!("split {pane_id}"));
        Ok("%1".to_string())
    }

    fn select_pane(&self, pane_id: &str) -> Result<()> {
        self.record(format!("select {pane_id}"));
        Ok(())
    }

    fn send_keys(&self, pane_id: &str, keys: &str, literal: bool) -> Result<()> {
        self.record(format!("send {pane_id} {keys} literal={literal}"));
        Ok(())
    }

    fn capture(&self, _pane_id: &str, _max_lines: usize) -> Result<String> {
        Ok(String::new())
    }

    fn clear(&self, _pane_id: &str) -> Result<()> {
        Ok(())
    }

    fn attach(&self, pane_id: &str) -> Result<()> {
        self.record(format!("attach {pane_id}"));
        Ok(())
    }

    fn list_panes(&self, _pane_id: &str) -> Result<Vec<PaneDetails>> {
        Ok(Vec::new())
    }

    fn pane_current_command(&self, _pane_id: &str) -> Result<String> {
        Ok("bash".to_string())
    }
}

#[test]
fn relaunch_command_quotes_the_prompt() {
    let cli = Cli::parse_from(["tmuxai", "--debug", "why is 'make' failing?"]);

    let command = relaunch_command(Path::new("/usr/local/bin/tmuxai"), &cli).unwrap();

    assert!(command.starts_with("/usr/local/bin/tmuxai --debug "), "{command}");
    assert_eq!(
        shlex::split(&command).unwrap(),
        vec!["/usr/local/bin/tmuxai", "--debug", "why is 'make' failing?"]
    );
}

#[tokio::test]
async fn relaunch_splits_a_chat_pane_and_attaches() {
    let tmux = RecordingTmux::default();

    relaunch_in_tmux(&tmux, "tmuxai --debug", Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(
        tmux.calls(),
        vec![
            "new-session",
            "split %0",
            "select %1",
            "send %1 tmuxai --debug literal=true",
            "send %1 Enter literal=false",
            "attach %0",
        ]
    );
}
