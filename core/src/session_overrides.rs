//! Session-scoped shadows for a small allow-list of config keys.
//!
//! Values set with `/config set` live only in memory and take precedence over
//! the loaded [`Config`] until the process exits.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::Config;
use crate::error::Result;
use crate::error::TmuxaiErr;
use crate::protocol::ActionKind;

pub const ALLOWED_CONFIG_KEYS: &[&str] = &[
    "max_capture_lines",
    "max_context_size",
    "wait_interval",
    "send_keys_confirm",
    "paste_multiline_confirm",
    "exec_confirm",
    "openrouter.model",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideValue {
    Int(u64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideValue::Int(v) => write!(f, "{v}"),
            OverrideValue::Bool(v) => write!(f, "{v}"),
            OverrideValue::Text(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SessionOverrides {
    values: BTreeMap<String, OverrideValue>,
}

impl SessionOverrides {
    pub fn is_allowed(key: &str) -> bool {
        ALLOWED_CONFIG_KEYS.contains(&key)
    }

    /// Parse `raw` for `key` and store it. Nothing is stored on error.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<OverrideValue> {
        ensure_allowed(key)?;
        let raw = raw.trim();
        let value = match key {
            "max_capture_lines" | "max_context_size" | "wait_interval" => {
                let value = raw.parse::<u64>().map_err(|_| {
                    TmuxaiErr::ConfigInvalid(format!("invalid integer value: {raw}"))
                })?;
                if value == 0 {
                    return Err(TmuxaiErr::ConfigInvalid(format!(
                        "{key} must be at least 1"
                    )));
                }
                OverrideValue::Int(value)
            }
            "send_keys_confirm" | "paste_multiline_confirm" | "exec_confirm" => {
                OverrideValue::Bool(parse_bool(raw).ok_or_else(|| {
                    TmuxaiErr::ConfigInvalid(format!(
                        "invalid boolean value: {raw} (use true or false)"
                    ))
                })?)
            }
            _ => {
                if raw.is_empty() {
                    return Err(TmuxaiErr::ConfigInvalid(format!("empty value for {key}")));
                }
                OverrideValue::Text(raw.to_string())
            }
        };
        self.values.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Effective value of `key`: the session override when set, otherwise the
    /// loaded config.
    pub fn get(&self, key: &str, config: &Config) -> Result<OverrideValue> {
        ensure_allowed(key)?;
        if let Some(value) = self.values.get(key) {
            return Ok(value.clone());
        }
        let value = match key {
            "max_capture_lines" => OverrideValue::Int(config.max_capture_lines as u64),
            "max_context_size" => OverrideValue::Int(config.max_context_size as u64),
            "wait_interval" => OverrideValue::Int(config.wait_interval),
            "send_keys_confirm" => OverrideValue::Bool(config.send_keys_confirm),
            "paste_multiline_confirm" => OverrideValue::Bool(config.paste_multiline_confirm),
            "exec_confirm" => OverrideValue::Bool(config.exec_confirm),
            _ => OverrideValue::Text(config.openrouter.model.clone()),
        };
        Ok(value)
    }

    pub fn is_overridden(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn max_capture_lines(&self, config: &Config) -> usize {
        self.int("max_capture_lines")
            .map_or(config.max_capture_lines, |v| v as usize)
    }

    pub fn max_context_size(&self, config: &Config) -> usize {
        self.int("max_context_size")
            .map_or(config.max_context_size, |v| v as usize)
    }

    pub fn wait_interval(&self, config: &Config) -> u64 {
        self.int("wait_interval").unwrap_or(config.wait_interval)
    }

    pub fn confirm_required(&self, kind: ActionKind, config: &Config) -> bool {
        let (key, default) = match kind {
            ActionKind::SendKeys => ("send_keys_confirm", config.send_keys_confirm),
            ActionKind::ExecCommand => ("exec_confirm", config.exec_confirm),
            ActionKind::Paste => ("paste_multiline_confirm", config.paste_multiline_confirm),
        };
        match self.values.get(key) {
            Some(OverrideValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Model override for the completion call, if one was set this session.
    pub fn model(&self) -> Option<&str> {
        match self.values.get("openrouter.model") {
            Some(OverrideValue::Text(model)) => Some(model.as_str()),
            _ => None,
        }
    }

    fn int(&self, key: &str) -> Option<u64> {
        match self.values.get(key) {
            Some(OverrideValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

fn ensure_allowed(key: &str) -> Result<()> {
    if SessionOverrides::is_allowed(key) {
        Ok(())
    } else {
        Err(TmuxaiErr::PolicyViolation(format!(
            "Config key '{key}' is not allowed to be modified. Allowed keys: {}",
            ALLOWED_CONFIG_KEYS.join(", ")
        )))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
