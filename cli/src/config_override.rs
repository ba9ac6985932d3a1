//! Support for `-c key=value` overrides on the command line.
//!
//! [`CliConfigOverrides`] is embedded into the clap-derived [`crate::Cli`]
//! with `#[clap(flatten)]`. Each occurrence of `-c key=value` (or
//! `--config key=value`) is collected as a raw string and only turned into a
//! TOML value when the config is loaded.

use clap::ArgAction;
use clap::Parser;
use tmuxai_core::config::parse_toml_value;
use toml::Value as TomlValue;

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a configuration value that would otherwise be loaded from
    /// `~/.config/tmuxai/config.toml`. Use a dotted path (`foo.bar`) for
    /// nested values. The `value` portion is parsed as TOML and falls back to
    /// a plain string.
    ///
    /// Examples:
    ///   - `-c openrouter.model=anthropic/claude-3.5-sonnet`
    ///   - `-c exec_confirm=false`
    ///   - `-c 'whitelist_patterns=["^ls", "^git status"]'`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Parse the raw strings captured from the CLI into `(path, value)`
    /// pairs.
    pub fn parse_overrides(&self) -> Result<Vec<(String, TomlValue)>, String> {
        self.raw_overrides
            .iter()
            .map(|s| {
                // Only split on the first '=' so values may contain it.
                let Some((key, value)) = s.split_once('=') else {
                    return Err(format!("Invalid override (missing '='): {s}"));
                };
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("Empty key in override: {s}"));
                }
                Ok((key.to_string(), parse_toml_value(value.trim())))
            })
            .collect()
    }

    /// Render the overrides back into argv form.
    pub fn to_args(&self) -> Vec<String> {
        self.raw_overrides
            .iter()
            .flat_map(|raw| ["-c".to_string(), raw.clone()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn overrides(raw: &[&str]) -> CliConfigOverrides {
        CliConfigOverrides {
            raw_overrides: raw.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn values_are_parsed_as_toml_with_string_fallback() {
        let parsed = overrides(&[
            "exec_confirm=false",
            "max_context_size = 100",
            "openrouter.model=openai/gpt-4o",
            "whitelist_patterns=[\"^ls\"]",
        ])
        .parse_overrides()
        .unwrap();

        assert_eq!(
            parsed,
            vec![
                ("exec_confirm".to_string(), TomlValue::Boolean(false)),
                ("max_context_size".to_string(), TomlValue::Integer(100)),
                (
                    "openrouter.model".to_string(),
                    TomlValue::String("openai/gpt-4o".to_string())
                ),
                (
                    "whitelist_patterns".to_string(),
                    TomlValue::Array(vec![TomlValue::String("^ls".to_string())])
                ),
            ]
        );
    }

    #[test]
    fn only_the_first_equals_sign_splits() {
        let parsed = overrides(&["prompts.base_system=a=b"])
            .parse_overrides()
            .unwrap();
        assert_eq!(parsed[0].1, TomlValue::String("a=b".to_string()));
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert!(overrides(&["exec_confirm"]).parse_overrides().is_err());
        assert!(overrides(&[" =1"]).parse_overrides().is_err());
    }
}
