use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use dirs::home_dir;
use regex_lite::Captures;
use regex_lite::Regex;
use serde::Deserialize;
use toml::Value as TomlValue;

use crate::config_types::McpServerConfig;
use crate::config_types::OpenRouterConfig;
use crate::config_types::PromptsConfig;
use crate::error::Result;
use crate::error::TmuxaiErr;

pub const CONFIG_TOML_FILE: &str = "config.toml";

/// Keys that can be set through `TMUXAI_<KEY>` environment variables, with
/// dots replaced by underscores (`openrouter.api_key` is
/// `TMUXAI_OPENROUTER_API_KEY`).
const ENV_OVERRIDABLE_KEYS: &[&str] = &[
    "debug",
    "max_capture_lines",
    "max_context_size",
    "wait_interval",
    "send_keys_confirm",
    "paste_multiline_confirm",
    "exec_confirm",
    "chars_per_token",
    "list_tools_timeout_sec",
    "tool_timeout_sec",
    "startup_timeout_sec",
    "openrouter.api_key",
    "openrouter.model",
    "openrouter.base_url",
    "openrouter.request_timeout_sec",
    "openrouter.max_retries",
];

/// Application configuration loaded from disk and merged with overrides.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Write every completion exchange to `<home>/debug/`.
    pub debug: bool,

    /// Scrollback lines captured from the exec pane each cycle.
    pub max_capture_lines: usize,

    /// Token ceiling for the chat history before it is squashed.
    pub max_context_size: usize,

    /// Seconds between watch mode ticks.
    pub wait_interval: u64,

    pub send_keys_confirm: bool,
    pub paste_multiline_confirm: bool,
    pub exec_confirm: bool,

    /// Commands matching one of these run without confirmation.
    pub whitelist_patterns: Vec<String>,

    /// Commands matching one of these never run.
    pub blacklist_patterns: Vec<String>,

    /// Divisor of the approximate token estimator.
    pub chars_per_token: usize,

    pub list_tools_timeout_sec: u64,
    pub tool_timeout_sec: u64,
    pub startup_timeout_sec: u64,

    pub openrouter: OpenRouterConfig,
    pub prompts: PromptsConfig,
    pub mcp_servers: Vec<McpServerConfig>,

    /// Directory holding config, logs and debug transcripts.
    #[serde(skip)]
    pub tmuxai_home: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            max_capture_lines: 200,
            max_context_size: 20_000,
            wait_interval: 5,
            send_keys_confirm: true,
            paste_multiline_confirm: true,
            exec_confirm: true,
            whitelist_patterns: Vec::new(),
            blacklist_patterns: Vec::new(),
            chars_per_token: 4,
            list_tools_timeout_sec: 10,
            tool_timeout_sec: 30,
            startup_timeout_sec: 10,
            openrouter: OpenRouterConfig::default(),
            prompts: PromptsConfig::default(),
            mcp_servers: Vec::new(),
            tmuxai_home: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load `<home>/config.toml`, then apply `TMUXAI_*` environment variables
    /// and finally the `-c key=value` pairs from the command line.
    pub fn load_with_cli_overrides(cli_overrides: Vec<(String, TomlValue)>) -> Result<Self> {
        let tmuxai_home = find_tmuxai_home()?;
        let root = load_config_as_toml_with_cli_overrides(&tmuxai_home, cli_overrides)?;
        Self::from_toml(root, tmuxai_home)
    }

    pub fn from_toml(root: TomlValue, tmuxai_home: PathBuf) -> Result<Self> {
        let mut cfg: Config = root
            .try_into()
            .map_err(|e: toml::de::Error| TmuxaiErr::ConfigInvalid(e.to_string()))?;
        cfg.tmuxai_home = tmuxai_home;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Intervals and sizes must be positive.
    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("wait_interval", self.wait_interval),
            ("max_capture_lines", self.max_capture_lines as u64),
            ("max_context_size", self.max_context_size as u64),
        ] {
            if value == 0 {
                return Err(TmuxaiErr::ConfigInvalid(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn list_tools_timeout(&self) -> Duration {
        Duration::from_secs(self.list_tools_timeout_sec)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_sec)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_sec)
    }

    pub fn find_mcp_server(&self, name: &str) -> Option<&McpServerConfig> {
        self.mcp_servers.iter().find(|server| server.name == name)
    }
}

pub fn load_config_as_toml_with_cli_overrides(
    tmuxai_home: &Path,
    cli_overrides: Vec<(String, TomlValue)>,
) -> Result<TomlValue> {
    let mut root = read_config_toml(&tmuxai_home.join(CONFIG_TOML_FILE))?;
    apply_env_overrides(&mut root, |name| std::env::var(name).ok());
    for (path, value) in cli_overrides {
        apply_toml_override(&mut root, &path, value);
    }
    expand_env_in_value(&mut root, &|name| std::env::var(name).ok());
    Ok(root)
}

fn read_config_toml(path: &Path) -> Result<TomlValue> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let table: toml::Table = toml::from_str(&contents).map_err(|e| {
                TmuxaiErr::ConfigInvalid(format!("failed to parse {}: {e}", path.display()))
            })?;
            Ok(TomlValue::Table(table))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!("{} not found, using defaults", path.display());
            Ok(TomlValue::Table(toml::Table::new()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse the right-hand side of an override. Anything that is not a TOML
/// literal is taken as a plain string, so `-c openrouter.model=gpt-4o` works
/// without quotes.
pub fn parse_toml_value(raw: &str) -> TomlValue {
    let wrapped = format!("_x_ = {raw}");
    match toml::from_str::<toml::Table>(&wrapped) {
        Ok(mut table) => table
            .remove("_x_")
            .unwrap_or_else(|| TomlValue::String(raw.to_string())),
        Err(_) => TomlValue::String(raw.to_string()),
    }
}

fn apply_env_overrides(root: &mut TomlValue, lookup: impl Fn(&str) -> Option<String>) {
    for key in ENV_OVERRIDABLE_KEYS {
        let var = format!("TMUXAI_{}", key.replace('.', "_").to_ascii_uppercase());
        if let Some(raw) = lookup(&var) {
            apply_toml_override(root, key, parse_toml_value(raw.trim()));
        }
    }
}

/// Apply a single dotted-path override onto `root`, creating intermediate
/// tables as necessary.
pub fn apply_toml_override(root: &mut TomlValue, path: &str, value: TomlValue) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (i, part) in parts.iter().enumerate() {
        if !current.is_table() {
            *current = TomlValue::Table(toml::Table::new());
        }
        let TomlValue::Table(table) = current else {
            return;
        };

        if i == parts.len() - 1 {
            table.insert((*part).to_string(), value);
            return;
        }

        current = table
            .entry((*part).to_string())
            .or_insert_with(|| TomlValue::Table(toml::Table::new()));
    }
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env reference regex");
    re
});

/// Replace `${VAR}` and `$VAR` with the value of the variable, or the empty
/// string when it is unset.
pub fn expand_env_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

fn expand_env_in_value(value: &mut TomlValue, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        TomlValue::String(s) => {
            if s.contains('$') {
                *s = expand_env_vars(s, lookup);
            }
        }
        TomlValue::Array(items) => {
            for item in items {
                expand_env_in_value(item, lookup);
            }
        }
        TomlValue::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_env_in_value(item, lookup);
            }
        }
        _ => {}
    }
}

/// Returns the tmuxai home directory: `$TMUXAI_HOME` when set, otherwise
/// `~/.config/tmuxai`. Does not verify that the directory exists.
pub fn find_tmuxai_home() -> io::Result<PathBuf> {
    if let Ok(home) = std::env::var("TMUXAI_HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    let mut p = home_dir().ok_or_else(|| {
        io::Error::new(ErrorKind::NotFound, "Could not find home directory")
    })?;
    p.push(".config");
    p.push("tmuxai");
    Ok(p)
}

/// Returns the path to the folder where tmuxai logs are stored. Does not
/// verify that the directory exists.
pub fn log_dir(cfg: &Config) -> PathBuf {
    cfg.tmuxai_home.join("log")
}

pub fn debug_dir(cfg: &Config) -> PathBuf {
    cfg.tmuxai_home.join("debug")
}
