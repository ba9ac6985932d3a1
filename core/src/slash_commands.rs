use std::fmt::Write as _;

use strum::IntoEnumIterator;
use strum_macros::AsRefStr;
use strum_macros::EnumIter;
use strum_macros::EnumString;
use strum_macros::IntoStaticStr;
use tracing::info;

use crate::agent::Agent;
use crate::protocol::AgentEvent;
use crate::session_overrides::ALLOWED_CONFIG_KEYS;

/// Commands that can be typed in the chat pane with a leading slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    // Order decides which command an abbreviation resolves to.
    Help,
    Clear,
    Reset,
    Exit,
    Info,
    Watch,
    Prepare,
    Config,
    Squash,
    Mcp,
}

impl SlashCommand {
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Help => "Show this help message",
            SlashCommand::Clear => "Clear the chat history",
            SlashCommand::Reset => "Reset the chat history and clear the exec pane",
            SlashCommand::Exit => "Exit the application",
            SlashCommand::Info => "Display system information",
            SlashCommand::Watch => "Start watch mode: /watch <description>",
            SlashCommand::Prepare => "Prepare the exec pane for TmuxAI automation",
            SlashCommand::Config => "Show or override config: /config <get|set> [key] [value]",
            SlashCommand::Squash => "Summarize the chat history",
            SlashCommand::Mcp => "Manage MCP servers for the current session",
        }
    }

    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Resolve the first word of the input. An abbreviation resolves to the
    /// first command it is a prefix of, so `/w` is `/watch`.
    pub fn parse_prefix(word: &str) -> Option<Self> {
        let word = word.trim().trim_start_matches('/').to_ascii_lowercase();
        if word.is_empty() {
            return None;
        }
        SlashCommand::iter().find(|cmd| cmd.command().starts_with(&word))
    }
}

/// What the front end should do after a slash command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    Exit,
    /// Start watch mode with this description.
    StartWatch(String),
}

pub fn is_slash_command(input: &str) -> bool {
    input.trim_start().starts_with('/')
}

pub fn help_text() -> String {
    let mut out = String::from("Available commands:");
    for cmd in SlashCommand::iter() {
        let _ = write!(out, "\n- /{}: {}", cmd.command(), cmd.description());
    }
    out
}

pub async fn handle_slash_command(agent: &mut Agent, input: &str) -> CommandOutcome {
    let mut parts = input.split_whitespace();
    let Some(first) = parts.next() else {
        agent.emit(AgentEvent::Warning("Empty command".to_string()));
        return CommandOutcome::Continue;
    };
    let args: Vec<&str> = parts.collect();
    info!("processing command: {}", input.trim());

    let Some(command) = SlashCommand::parse_prefix(first) else {
        agent.emit(AgentEvent::Warning(format!(
            "Unknown command: {first}. Use '/help' for more info."
        )));
        return CommandOutcome::Continue;
    };

    match command {
        SlashCommand::Help => agent.emit(AgentEvent::Info(help_text())),
        SlashCommand::Info => {
            let text = format_info(agent).await;
            agent.emit(AgentEvent::Info(text));
        }
        SlashCommand::Prepare => match agent.prepare().await {
            Ok(()) => agent.emit(AgentEvent::Info(format!(
                "Exec pane {} prepared successfully ({} commands in history)",
                agent.exec_pane_id(),
                agent.exec_history().len()
            ))),
            Err(err) => agent.emit(AgentEvent::Error(format!(
                "Failed to prepare exec pane: {err}"
            ))),
        },
        SlashCommand::Clear => agent.clear(),
        SlashCommand::Reset => {
            if let Err(err) = agent.reset() {
                agent.emit(AgentEvent::Error(format!("Failed to clear exec pane: {err}")));
            }
        }
        SlashCommand::Exit => return CommandOutcome::Exit,
        SlashCommand::Squash => {
            if agent.history().len() <= 1 {
                agent.emit(AgentEvent::Info("Nothing to squash".to_string()));
            } else {
                agent.squash().await;
            }
        }
        SlashCommand::Watch => {
            if args.is_empty() {
                agent.emit(AgentEvent::Warning(
                    "Usage: /watch <description>".to_string(),
                ));
            } else {
                return CommandOutcome::StartWatch(args.join(" "));
            }
        }
        SlashCommand::Config => handle_config(agent, &args),
        SlashCommand::Mcp => handle_mcp(agent, &args).await,
    }
    CommandOutcome::Continue
}

fn handle_config(agent: &mut Agent, args: &[&str]) {
    match args {
        ["get"] => {
            let mut out = String::from("Current configuration:");
            for key in ALLOWED_CONFIG_KEYS {
                if let Ok(value) = agent.overrides().get(key, agent.config()) {
                    let marker = if agent.overrides().is_overridden(key) {
                        " (session)"
                    } else {
                        ""
                    };
                    let _ = write!(out, "\n  {key}: {value}{marker}");
                }
            }
            agent.emit(AgentEvent::Info(out));
        }
        ["get", key] => match agent.overrides().get(key, agent.config()) {
            Ok(value) => agent.emit(AgentEvent::Info(format!("{key}: {value}"))),
            Err(err) => agent.emit(AgentEvent::Error(err.to_string())),
        },
        ["get", ..] => agent.emit(AgentEvent::Warning("Usage: /config get [key]".to_string())),
        ["set", key, value] => match agent.overrides_mut().set(key, value) {
            Ok(value) => agent.emit(AgentEvent::Info(format!("Set {key} = {value}"))),
            Err(err) => agent.emit(AgentEvent::Error(format!("Error setting config: {err}"))),
        },
        ["set", ..] => agent.emit(AgentEvent::Warning(
            "Usage: /config set <key> <value>".to_string(),
        )),
        [] => agent.emit(AgentEvent::Warning(
            "Usage: /config <get|set> [key] [value]".to_string(),
        )),
        [other, ..] => agent.emit(AgentEvent::Warning(format!(
            "Unknown /config subcommand: {other}. Use 'get' or 'set'."
        ))),
    }
}

async fn handle_mcp(agent: &mut Agent, args: &[&str]) {
    match args.first().copied().unwrap_or("list") {
        "list" => {
            if agent.config().mcp_servers.is_empty() {
                agent.emit(AgentEvent::Info(
                    "No MCP servers configured. Add [[mcp_servers]] entries to your config file."
                        .to_string(),
                ));
                return;
            }
            if agent.select_servers().await {
                show_current_servers(agent).await;
            }
        }
        "current" => show_current_servers(agent).await,
        "help" => agent.emit(AgentEvent::Info(MCP_HELP.trim().to_string())),
        other => agent.emit(AgentEvent::Warning(format!(
            "Unknown /mcp subcommand: {other}. Use '/mcp help' for more info."
        ))),
    }
}

const MCP_HELP: &str = "
/mcp: Manage MCP servers for the current session.

  /mcp or /mcp list
    Pick which configured servers are connected for this session.

  /mcp current
    Show the servers connected for this session and their tool counts.

  /mcp help
    Show this help message.
";

async fn show_current_servers(agent: &Agent) {
    if agent.active_servers().is_empty() {
        agent.emit(AgentEvent::Info(
            "No MCP servers are currently selected for this session.".to_string(),
        ));
        return;
    }

    let mut entries = Vec::with_capacity(agent.active_servers().len());
    for name in agent.active_servers() {
        match agent.registry().list_tools(name).await {
            Ok(tools) => entries.push(format!("{name} (tools: {} available)", tools.len())),
            Err(err) => {
                info!("listing tools of {name} failed: {err}");
                entries.push(format!("{name} (tools: unavailable)"));
            }
        }
    }
    agent.emit(AgentEvent::Info(format!(
        "Current MCP servers for this session: {}",
        entries.join(", ")
    )));
}

async fn format_info(agent: &Agent) -> String {
    let config = agent.config();
    let overrides = agent.overrides();
    let mut out = String::new();

    let _ = writeln!(out, "General");
    info_line(&mut out, "Version", env!("CARGO_PKG_VERSION"));
    info_line(
        &mut out,
        "Max Capture Lines",
        overrides.max_capture_lines(config),
    );
    info_line(
        &mut out,
        "Wait Interval",
        format!("{}s", overrides.wait_interval(config)),
    );
    let model = overrides.model().unwrap_or(config.openrouter.model.as_str());
    info_line(&mut out, "Model", model);
    let status = agent.status();
    let status_text = format!("{status:?}{}", if agent.watch_mode() { " (watch)" } else { "" });
    info_line(&mut out, "Status", status_text);

    let tokens = agent.context().history_tokens(agent.history());
    let max = agent.max_context_size();
    let percent = if max > 0 {
        tokens as f64 / max as f64 * 100.0
    } else {
        0.0
    };
    let _ = writeln!(out, "\nContext");
    info_line(&mut out, "Messages", agent.history().len());
    info_line(&mut out, "Context Size~", format!("{tokens} tokens"));
    info_line(&mut out, "", progress_bar(percent, 10));
    info_line(&mut out, "Max Size", format!("{max} tokens"));

    let _ = writeln!(out, "\nTmux Window Panes");
    match agent.panes().list_panes(agent.chat_pane_id()) {
        Ok(panes) => {
            for pane in panes {
                let role = if pane.id == agent.chat_pane_id() {
                    "chat"
                } else if pane.id == agent.exec_pane_id() {
                    if agent.is_prepared() {
                        "exec, prepared"
                    } else {
                        "exec"
                    }
                } else {
                    "other"
                };
                let _ = writeln!(
                    out,
                    "  {} [{role}] {} {}x{}{}",
                    pane.id,
                    pane.current_command,
                    pane.width,
                    pane.height,
                    if pane.is_active { " (active)" } else { "" }
                );
            }
        }
        Err(err) => {
            let _ = writeln!(out, "  unavailable: {err}");
        }
    }

    let _ = writeln!(out, "\nMCP Servers");
    let catalog = agent.registry().tool_catalog().await;
    if catalog.is_empty() {
        let _ = writeln!(out, "  none connected");
    }
    for server in catalog {
        let _ = writeln!(out, "  {} ({} tools)", server.name, server.tools.len());
    }
    out.trim_end().to_string()
}

fn info_line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{label:<18}  {value}");
}

/// `[████░░░░░░] 42.0%`, clamped to the bar width.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let width = width.max(1);
    let filled = ((percent / 100.0) * width as f64).clamp(0.0, width as f64) as usize;
    format!(
        "[{}{}] {percent:.1}%",
        "█".repeat(filled),
        "░".repeat(width - filled)
    )
}
