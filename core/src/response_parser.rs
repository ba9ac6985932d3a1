//! Turns the model's tagged free-text answer into an [`AgentDecision`].
//!
//! Actions are written as XML-like tags, e.g.
//! `<ExecCommand>ls -la</ExecCommand>` or
//! `<ToolCall>{"server_name":"fs","tool_name":"read","arguments":{}}</ToolCall>`.
//! Flags use the same form with `1` or `true` as the body, and may also be
//! self-closing (`<RequestAccomplished/>`). Text outside of tags is the
//! message shown to the user.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::warn;

use crate::protocol::AgentAction;
use crate::protocol::AgentDecision;
use crate::protocol::ToolCall;

const TOOL_CALL: &str = "ToolCall";
const SEND_KEYS: &str = "TmuxSendKeys";
const EXEC_COMMAND: &str = "ExecCommand";
const PASTE: &str = "PasteMultilineContent";
const REQUEST_ACCOMPLISHED: &str = "RequestAccomplished";
const PANE_BUSY: &str = "ExecPaneSeemsBusy";
const WAITING_FOR_USER: &str = "WaitingForUserResponse";
const NO_COMMENT: &str = "NoComment";

const TAGS: &[&str] = &[
    TOOL_CALL,
    SEND_KEYS,
    EXEC_COMMAND,
    PASTE,
    REQUEST_ACCOMPLISHED,
    PANE_BUSY,
    WAITING_FOR_USER,
    NO_COMMENT,
];

#[allow(clippy::expect_used)]
static TAG_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TAGS.iter()
        .map(|tag| {
            let pattern = format!(r"(?s)<{tag}>(.*?)</{tag}>|<{tag}\s*/>");
            (*tag, Regex::new(&pattern).expect("tag pattern"))
        })
        .collect()
});

pub fn parse_decision(response: &str) -> AgentDecision {
    let mut decision = AgentDecision::default();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    let mut tool_calls = Vec::new();
    let mut send_keys = Vec::new();
    let mut exec_commands = Vec::new();
    let mut pastes = Vec::new();

    for (tag, re) in TAG_PATTERNS.iter() {
        for caps in re.captures_iter(response) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            spans.push((whole.start(), whole.end()));
            // Self-closing form has no body.
            let body = caps.get(1).map(|m| m.as_str());

            match *tag {
                TOOL_CALL => match parse_tool_call(body.unwrap_or_default()) {
                    Ok(call) => tool_calls.push(AgentAction::ToolCall(call)),
                    Err(reason) => {
                        warn!("ignoring malformed tool call: {reason}");
                        decision
                            .warnings
                            .push(format!("Ignoring malformed tool call: {reason}"));
                    }
                },
                SEND_KEYS => {
                    if let Some(keys) = non_empty(body) {
                        send_keys.push(AgentAction::SendKeys(keys.to_string()));
                    }
                }
                EXEC_COMMAND => {
                    if let Some(command) = non_empty(body) {
                        exec_commands.push(AgentAction::ExecCommand(command.to_string()));
                    }
                }
                PASTE => {
                    let content = body.unwrap_or_default().trim_matches(['\n', '\r']);
                    if !content.trim().is_empty() {
                        pastes.push(AgentAction::Paste(content.to_string()));
                    }
                }
                REQUEST_ACCOMPLISHED => decision.request_accomplished |= flag_value(body),
                PANE_BUSY => decision.pane_seems_busy |= flag_value(body),
                WAITING_FOR_USER => decision.waiting_for_user |= flag_value(body),
                NO_COMMENT => decision.no_comment |= flag_value(body),
                _ => {}
            }
        }
    }

    decision.actions = tool_calls
        .into_iter()
        .chain(send_keys)
        .chain(exec_commands)
        .chain(pastes)
        .collect();
    decision.message = strip_spans(response, spans);
    decision
}

fn parse_tool_call(body: &str) -> Result<ToolCall, String> {
    let call: ToolCall = serde_json::from_str(body.trim()).map_err(|e| e.to_string())?;
    if call.server_name.trim().is_empty() || call.tool_name.trim().is_empty() {
        return Err("server_name and tool_name are required".to_string());
    }
    Ok(call)
}

fn non_empty(body: Option<&str>) -> Option<&str> {
    body.map(str::trim).filter(|s| !s.is_empty())
}

fn flag_value(body: Option<&str>) -> bool {
    match body {
        None => true,
        Some(body) => matches!(
            body.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
    }
}

/// Remove tagged regions and tidy the blank lines they leave behind.
fn strip_spans(response: &str, mut spans: Vec<(usize, usize)>) -> String {
    spans.sort_unstable();
    let mut remaining = String::with_capacity(response.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start >= cursor {
            remaining.push_str(&response[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    remaining.push_str(&response[cursor..]);

    let mut lines: Vec<&str> = Vec::new();
    for line in remaining.lines().map(str::trim_end) {
        let previous_blank = lines.last().is_some_and(|l| l.is_empty());
        if line.is_empty() && (lines.is_empty() || previous_blank) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn plain_text_is_the_message() {
        let decision = parse_decision("Nothing to do here.\n");
        assert_eq!(decision.message, "Nothing to do here.");
        assert!(decision.actions.is_empty());
        assert!(!decision.request_accomplished);
    }

    #[test]
    fn actions_come_back_in_dispatch_order() {
        let response = r#"Let me check.
<ExecCommand>ls -la</ExecCommand>
<PasteMultilineContent>
line one
line two
</PasteMultilineContent>
<TmuxSendKeys>C-c</TmuxSendKeys>
<ToolCall>{"server_name":"fs","tool_name":"read","arguments":{"path":"/etc/hosts"}}</ToolCall>
<ExecCommand>pwd</ExecCommand>"#;

        let decision = parse_decision(response);
        let mut arguments = serde_json::Map::new();
        arguments.insert("path".to_string(), json!("/etc/hosts"));

        assert_eq!(
            decision.actions,
            vec![
                AgentAction::ToolCall(ToolCall {
                    server_name: "fs".to_string(),
                    tool_name: "read".to_string(),
                    arguments,
                }),
                AgentAction::SendKeys("C-c".to_string()),
                AgentAction::ExecCommand("ls -la".to_string()),
                AgentAction::ExecCommand("pwd".to_string()),
                AgentAction::Paste("line one\nline two".to_string()),
            ]
        );
        assert_eq!(decision.message, "Let me check.");
    }

    #[test]
    fn flags_accept_numeric_boolean_and_self_closing_forms() {
        let decision = parse_decision(
            "Done.<RequestAccomplished>1</RequestAccomplished>\
             <ExecPaneSeemsBusy>true</ExecPaneSeemsBusy>\
             <WaitingForUserResponse>0</WaitingForUserResponse>\
             <NoComment/>",
        );
        assert!(decision.request_accomplished);
        assert!(decision.pane_seems_busy);
        assert!(!decision.waiting_for_user);
        assert!(decision.no_comment);
        assert_eq!(decision.message, "Done.");
    }

    #[test]
    fn malformed_tool_call_is_dropped_with_warning() {
        let decision = parse_decision(
            "<ToolCall>{not json}</ToolCall><ToolCall>{\"server_name\":\"\",\"tool_name\":\"x\"}</ToolCall><ExecCommand>echo ok</ExecCommand>",
        );
        assert_eq!(
            decision.actions,
            vec![AgentAction::ExecCommand("echo ok".to_string())]
        );
        assert_eq!(decision.warnings.len(), 2);
    }

    #[test]
    fn tool_call_without_arguments_defaults_to_empty_map() {
        let decision =
            parse_decision(r#"<ToolCall>{"server_name":"time","tool_name":"now"}</ToolCall>"#);
        match decision.actions.as_slice() {
            [AgentAction::ToolCall(call)] => assert!(call.arguments.is_empty()),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn empty_bodies_produce_no_actions() {
        let decision = parse_decision("<ExecCommand>  </ExecCommand><TmuxSendKeys></TmuxSendKeys>");
        assert!(decision.actions.is_empty());
    }
}
