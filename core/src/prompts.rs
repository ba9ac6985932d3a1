//! Built-in prompt texts and the templates that assemble them.

use askama::Template;
use tracing::warn;

use crate::config_types::PromptsConfig;
use crate::protocol::CommandExecHistory;
use crate::protocol::ServerTools;
use crate::transcript::PendingCommand;
use crate::util::keep_tail;

const BASE_SYSTEM_PROMPT: &str = include_str!("../templates/prompts/base_system.md");
const CHAT_ASSISTANT_PROMPT: &str = include_str!("../templates/prompts/chat_assistant.md");
const CHAT_ASSISTANT_PREPARED_PROMPT: &str =
    include_str!("../templates/prompts/chat_assistant_prepared.md");
const SQUASH_PROMPT: &str = include_str!("../templates/prompts/squash.md");

/// Exec history entries included in the system prompt.
const MAX_HISTORY_ENTRIES: usize = 20;
/// Characters kept from the end of each command's output.
const MAX_OUTPUT_CHARS: usize = 2_000;

#[derive(Template)]
#[template(path = "prompts/system_prompt.md", escape = "none")]
struct SystemPromptTemplate<'a> {
    base: &'a str,
    assistant: &'a str,
    os: &'a str,
    exec_pane_id: &'a str,
    servers: &'a [ServerTools],
    prepared: bool,
    history: Vec<HistoryEntry<'a>>,
    pending: Option<&'a str>,
    pane_content: &'a str,
}

struct HistoryEntry<'a> {
    command: &'a str,
    output: &'a str,
    exit_code: i32,
}

#[derive(Template)]
#[template(path = "prompts/watch.md", escape = "none")]
struct WatchTemplate<'a> {
    base: &'a str,
    description: &'a str,
}

/// Per-cycle inputs of the system prompt.
pub struct SystemPromptContext<'a> {
    pub exec_pane_id: &'a str,
    pub prepared: bool,
    pub exec_history: &'a [CommandExecHistory],
    pub pending: Option<&'a PendingCommand>,
    pub pane_content: &'a str,
    pub servers: &'a [ServerTools],
}

pub fn os_description() -> String {
    format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
}

pub fn system_prompt(prompts: &PromptsConfig, ctx: &SystemPromptContext<'_>) -> String {
    let base = pick(&prompts.base_system, BASE_SYSTEM_PROMPT);
    let assistant = if ctx.prepared {
        format!(
            "{}\n\n{}",
            pick(&prompts.chat_assistant, CHAT_ASSISTANT_PROMPT),
            pick(
                &prompts.chat_assistant_prepared,
                CHAT_ASSISTANT_PREPARED_PROMPT
            )
        )
    } else {
        pick(&prompts.chat_assistant, CHAT_ASSISTANT_PROMPT).to_string()
    };
    let os = os_description();

    let skip = ctx.exec_history.len().saturating_sub(MAX_HISTORY_ENTRIES);
    let history = ctx.exec_history[skip..]
        .iter()
        .map(|entry| HistoryEntry {
            command: &entry.command,
            output: keep_tail(&entry.output, MAX_OUTPUT_CHARS),
            exit_code: entry.exit_code,
        })
        .collect();

    let template = SystemPromptTemplate {
        base,
        assistant: &assistant,
        os: &os,
        exec_pane_id: ctx.exec_pane_id,
        servers: ctx.servers,
        prepared: ctx.prepared,
        history,
        pending: ctx.pending.map(|p| p.command.as_str()),
        pane_content: ctx.pane_content.trim_end(),
    };
    match template.render() {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!("failed to render system prompt: {err}");
            format!("{base}\n\n{assistant}\n\n{}", ctx.pane_content)
        }
    }
}

/// The per-tick user message of watch mode.
pub fn watch_instruction(prompts: &PromptsConfig, description: &str) -> String {
    let template = WatchTemplate {
        base: prompts.watch.trim(),
        description: description.trim(),
    };
    match template.render() {
        Ok(rendered) => rendered.trim().to_string(),
        Err(err) => {
            warn!("failed to render watch prompt: {err}");
            format!("Watch for: {}", description.trim())
        }
    }
}

pub fn squash_instruction(prompts: &PromptsConfig) -> &str {
    pick(&prompts.squash, SQUASH_PROMPT)
}

fn pick<'a>(configured: &'a str, built_in: &'a str) -> &'a str {
    if configured.trim().is_empty() {
        built_in.trim_end()
    } else {
        configured
    }
}
