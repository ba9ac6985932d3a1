use std::fmt::Write as _;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use chrono::SecondsFormat;
use tracing::warn;

use crate::chat_completions::role_for;
use crate::protocol::ChatMessage;

/// Writes one text file per completion exchange when `debug = true`.
/// Failures are logged and otherwise ignored.
#[derive(Clone, Debug, Default)]
pub struct DebugLogger {
    directory: Option<PathBuf>,
}

impl DebugLogger {
    pub fn new(directory: &Path) -> Self {
        match std::fs::create_dir_all(directory) {
            Ok(()) => Self {
                directory: Some(directory.to_path_buf()),
            },
            Err(err) => {
                warn!("failed to create debug directory {directory:?}: {err}");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { directory: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.directory.is_some()
    }

    pub fn log_exchange(&self, messages: &[ChatMessage], response: &str) -> Option<PathBuf> {
        let directory = self.directory.as_ref()?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        let path = directory.join(format!("debug-{stamp}.txt"));

        if let Err(err) = std::fs::write(&path, render_exchange(messages, response)) {
            warn!("failed to write debug transcript {path:?}: {err}");
            return None;
        }
        Some(path)
    }
}

fn render_exchange(messages: &[ChatMessage], response: &str) -> String {
    let mut out = String::from("==================    SENT CHAT MESSAGES ==================\n\n");
    for (i, msg) in messages.iter().enumerate() {
        let _ = writeln!(
            out,
            "Message {}: Role={}, Time={}",
            i + 1,
            role_for(i, msg),
            msg.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "Content:\n{}\n", msg.content);
    }
    out.push_str("==================    RECEIVED RESPONSE ==================\n\n");
    out.push_str(response);
    out.push_str("\n\n==================    END DEBUG ==================\n");
    out
}
