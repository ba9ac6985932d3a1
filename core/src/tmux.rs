//! Control surface over the tmux server.

use std::process::Command;
use std::process::Stdio;

use tokio::runtime::Handle;
use tokio::runtime::RuntimeFlavor;
use tracing::debug;

use crate::error::Result;
use crate::error::TmuxaiErr;
use crate::protocol::PaneDetails;

/// Synchronous tmux operations. Every call either succeeds or fails with
/// [`TmuxaiErr::PaneUnavailable`].
pub trait PaneController: Send + Sync {
    fn current_pane_id(&self) -> Result<String>;
    fn create_session(&self) -> Result<String>;
    /// Split `pane_id` horizontally and return the new pane id.
    fn create_adjacent_pane(&self, pane_id: &str) -> Result<String>;
    fn select_pane(&self, pane_id: &str) -> Result<()>;
    /// With `literal` the text is typed as-is, otherwise each whitespace
    /// separated word is a tmux key name (`C-c`, `Enter`, `q`).
    fn send_keys(&self, pane_id: &str, keys: &str, literal: bool) -> Result<()>;
    fn capture(&self, pane_id: &str, max_lines: usize) -> Result<String>;
    fn clear(&self, pane_id: &str) -> Result<()>;
    fn attach(&self, pane_id: &str) -> Result<()>;
    /// Panes in the window that contains `pane_id`.
    fn list_panes(&self, pane_id: &str) -> Result<Vec<PaneDetails>>;
    fn pane_current_command(&self, pane_id: &str) -> Result<String>;
}

/// [`PaneController`] backed by the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxCli {
    program: String,
}

impl Default for TmuxCli {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
        }
    }
}

impl TmuxCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("{} {}", self.program, args.join(" "));
        let output = blocking(|| {
            Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .output()
        })
        .map_err(|e| TmuxaiErr::PaneUnavailable(format!("failed to run tmux: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TmuxaiErr::PaneUnavailable(format!(
                "tmux {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PaneController for TmuxCli {
    fn current_pane_id(&self) -> Result<String> {
        if std::env::var_os("TMUX").is_none() {
            return Err(TmuxaiErr::PaneUnavailable(
                "not running inside a tmux session".to_string(),
            ));
        }
        if let Ok(pane) = std::env::var("TMUX_PANE") {
            if !pane.is_empty() {
                return Ok(pane);
            }
        }
        Ok(self
            .run(&["display-message", "-p", "#{pane_id}"])?
            .trim()
            .to_string())
    }

    fn create_session(&self) -> Result<String> {
        Ok(self
            .run(&["new-session", "-d", "-P", "-F", "#{pane_id}"])?
            .trim()
            .to_string())
    }

    fn create_adjacent_pane(&self, pane_id: &str) -> Result<String> {
        Ok(self
            .run(&["split-window", "-d", "-h", "-t", pane_id, "-P", "-F", "#{pane_id}"])?
            .trim()
            .to_string())
    }

    fn select_pane(&self, pane_id: &str) -> Result<()> {
        self.run(&["select-pane", "-t", pane_id]).map(|_| ())
    }

    fn send_keys(&self, pane_id: &str, keys: &str, literal: bool) -> Result<()> {
        let mut args = vec!["send-keys", "-t", pane_id];
        if literal {
            args.push("-l");
            args.push(keys);
        } else {
            args.extend(keys.split_whitespace());
        }
        self.run(&args).map(|_| ())
    }

    fn capture(&self, pane_id: &str, max_lines: usize) -> Result<String> {
        let start = format!("-{max_lines}");
        self.run(&["capture-pane", "-p", "-J", "-t", pane_id, "-S", &start])
    }

    fn clear(&self, pane_id: &str) -> Result<()> {
        self.send_keys(pane_id, "C-l", false)?;
        self.run(&["clear-history", "-t", pane_id]).map(|_| ())
    }

    fn attach(&self, pane_id: &str) -> Result<()> {
        let status = blocking(|| {
            Command::new(&self.program)
                .args(["attach-session", "-t", pane_id])
                .status()
        })
        .map_err(|e| TmuxaiErr::PaneUnavailable(format!("failed to run tmux: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(TmuxaiErr::PaneUnavailable(format!(
                "tmux attach-session exited with {status}"
            )))
        }
    }

    fn list_panes(&self, pane_id: &str) -> Result<Vec<PaneDetails>> {
        let output = self.run(&[
            "list-panes",
            "-t",
            pane_id,
            "-F",
            "#{pane_id}\t#{pane_current_command}\t#{pane_active}\t#{pane_width}\t#{pane_height}",
        ])?;
        Ok(output.lines().filter_map(parse_pane_line).collect())
    }

    fn pane_current_command(&self, pane_id: &str) -> Result<String> {
        Ok(self
            .run(&["display-message", "-p", "-t", pane_id, "#{pane_current_command}"])?
            .trim()
            .to_string())
    }
}

/// Run a synchronous tmux call. On a multi-threaded runtime the worker hands
/// its queued tasks to another thread first.
fn blocking<T>(call: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(call)
        }
        _ => call(),
    }
}

fn parse_pane_line(line: &str) -> Option<PaneDetails> {
    let mut fields = line.split('\t');
    let id = fields.next()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(PaneDetails {
        id: id.to_string(),
        current_command: fields.next().unwrap_or_default().to_string(),
        is_active: fields.next() == Some("1"),
        width: fields.next().and_then(|w| w.parse().ok()).unwrap_or_default(),
        height: fields.next().and_then(|h| h.parse().ok()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pane_lines_are_parsed() {
        assert_eq!(
            parse_pane_line("%3\tzsh\t1\t120\t40"),
            Some(PaneDetails {
                id: "%3".to_string(),
                current_command: "zsh".to_string(),
                is_active: true,
                width: 120,
                height: 40,
            })
        );
        assert_eq!(parse_pane_line(""), None);
    }

    #[test]
    fn missing_binary_is_pane_unavailable() {
        let tmux = TmuxCli::new("/nonexistent/tmux-binary");
        let err = tmux.capture("%1", 10).unwrap_err();
        assert!(matches!(err, TmuxaiErr::PaneUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn calls_work_on_a_current_thread_runtime() {
        let tmux = TmuxCli::new("/nonexistent/tmux-binary");
        let err = tmux.capture("%1", 10).unwrap_err();
        assert!(matches!(err, TmuxaiErr::PaneUnavailable(_)), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn slow_calls_do_not_stall_other_tasks() {
        let call = tokio::spawn(async {
            TmuxCli::new("sleep")
                .run(&["1"])
                .map(|_| std::time::Instant::now())
        });
        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            std::time::Instant::now()
        });

        let call_finished = call.await.unwrap().unwrap();
        let ticked = ticker.await.unwrap();
        assert!(ticked < call_finished);
    }
}
