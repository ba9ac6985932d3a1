//! Reads command history back out of a prepared exec pane.
//!
//! A prepared shell prints `host@user:cwd[HH:MM][exit]» ` before every
//! command, where `exit` is the status of the command that just finished.
//! Each prompt therefore closes the previous command block and opens the
//! next one.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::protocol::CommandExecHistory;

/// `PS1` for bash, producing the prompt recognised by [`parse_transcript`].
pub const BASH_PROMPT: &str = r"\h@\u:\w[\A][$?]» ";

/// `PROMPT` for zsh, producing the same prompt shape as [`BASH_PROMPT`].
pub const ZSH_PROMPT: &str = "%m@%n:%~[%T][%?]» ";

#[allow(clippy::expect_used)]
static PROMPT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<host>[^@\s]+)@(?P<user>[^:\s]+):(?P<dir>.*?)\[(?P<time>\d{1,2}:\d{2})\]\[(?P<code>-?\d+)\]» ?(?P<command>.*)$",
    )
    .expect("prompt regex")
});

/// A command whose block has not been closed by a prompt yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTranscript {
    pub records: Vec<CommandExecHistory>,
    /// Set when the capture ends inside a running command. It is picked up
    /// again by the next parse once its prompt has been printed.
    pub pending: Option<PendingCommand>,
}

struct OpenBlock {
    command: String,
    output: Vec<String>,
}

pub fn parse_transcript(capture: &str) -> ParsedTranscript {
    let mut records = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for line in capture.lines() {
        if let Some(caps) = PROMPT_LINE.captures(line) {
            let exit_code = caps
                .name("code")
                .and_then(|m| m.as_str().parse::<i32>().ok())
                .unwrap_or_default();

            if let Some(block) = open.take() {
                if !block.command.is_empty() {
                    records.push(CommandExecHistory {
                        command: block.command,
                        output: join_output(&block.output),
                        exit_code,
                    });
                }
            }

            open = Some(OpenBlock {
                command: caps
                    .name("command")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                output: Vec::new(),
            });
        } else if let Some(block) = open.as_mut() {
            block.output.push(line.to_string());
        }
        // Lines before the first prompt belong to an unknown command.
    }

    let pending = open
        .filter(|block| !block.command.is_empty())
        .map(|block| PendingCommand {
            output: join_output(&block.output),
            command: block.command,
        });

    ParsedTranscript { records, pending }
}

/// True when the last non-empty line of the capture is a prepared prompt.
pub fn is_prepared_capture(capture: &str) -> bool {
    capture
        .lines()
        .rev()
        .map(str::trim_end)
        .find(|line| !line.is_empty())
        .is_some_and(|line| PROMPT_LINE.is_match(line))
}

fn join_output(lines: &[String]) -> String {
    lines.join("\n").trim_end().to_string()
}
