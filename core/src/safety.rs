use regex_lite::Regex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyCheck {
    AutoApprove,
    AskUser,
    Reject { reason: String },
}

#[derive(Debug, Clone)]
struct CommandPattern {
    source: String,
    regex: Regex,
}

impl CommandPattern {
    /// Patterns are regular expressions; one that does not compile is matched
    /// as a literal substring instead.
    fn new(source: &str) -> Option<Self> {
        let regex = match Regex::new(source) {
            Ok(regex) => regex,
            Err(err) => {
                warn!("pattern `{source}` is not a valid regex ({err}); matching it literally");
                Regex::new(&regex_lite::escape(source)).ok()?
            }
        };
        Some(Self {
            source: source.to_string(),
            regex,
        })
    }

    fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// Allow/deny lists applied to every command, key sequence and paste before
/// it reaches the exec pane.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allow: Vec<CommandPattern>,
    deny: Vec<CommandPattern>,
}

impl CommandPolicy {
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| !p.trim().is_empty())
                .filter_map(|p| CommandPattern::new(p))
                .collect()
        };
        Self {
            allow: compile(allow),
            deny: compile(deny),
        }
    }

    /// Deny wins over allow; otherwise `confirm` decides whether the user is
    /// asked. Within each list the first matching pattern is reported.
    pub fn assess(&self, command: &str, confirm: bool) -> SafetyCheck {
        if let Some(pattern) = self.deny.iter().find(|p| p.is_match(command)) {
            return SafetyCheck::Reject {
                reason: format!("matches blacklist pattern `{}`", pattern.source),
            };
        }

        if self.allow.iter().any(|p| p.is_match(command)) {
            return SafetyCheck::AutoApprove;
        }

        if confirm {
            SafetyCheck::AskUser
        } else {
            SafetyCheck::AutoApprove
        }
    }
}
