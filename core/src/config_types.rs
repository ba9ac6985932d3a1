//! Types used to define the fields of [`crate::config::Config`].

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-flash-1.5";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout_sec: u64,
    /// Extra attempts after the first failed request.
    pub max_retries: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            request_timeout_sec: 120,
            max_retries: 2,
        }
    }
}

/// Prompt overrides. An empty string keeps the built-in text.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PromptsConfig {
    pub base_system: String,
    pub chat_assistant: String,
    pub chat_assistant_prepared: String,
    pub watch: String,
    pub squash: String,
}

/// One `[[mcp_servers]]` entry.
///
/// The transport is kept as the raw string from the file and only validated
/// when the server is connected, so one bad entry cannot prevent the rest of
/// the config from loading.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    pub name: String,

    #[serde(rename = "type", default = "default_transport_type")]
    pub transport_type: String,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Sent as a bearer token to HTTP based servers.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per tool call timeout in seconds. Falls back to `tool_timeout_sec`.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Extra connection attempts after the first failure.
    #[serde(default)]
    pub retry_count: u32,

    /// Connect at startup. Otherwise the server is only started once it is
    /// picked with `/mcp list`.
    #[serde(default)]
    pub autoconnect: bool,
}

fn default_transport_type() -> String {
    "stdio".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpServerTransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
    },
    StreamableHttp {
        url: String,
    },
}

impl McpServerConfig {
    /// Resolve the transport described by this entry.
    pub fn transport(&self) -> Result<McpServerTransportConfig, String> {
        match self.transport_type.trim().to_ascii_lowercase().as_str() {
            "stdio" => {
                let command = self
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|command| !command.is_empty())
                    .ok_or_else(|| {
                        format!("MCP server '{}' of type stdio needs a `command`", self.name)
                    })?;
                Ok(McpServerTransportConfig::Stdio {
                    command: command.to_string(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                })
            }
            "sse" => Ok(McpServerTransportConfig::Sse { url: self.url()? }),
            "streamable-http" | "streamable_http" | "streamablehttp" | "http" => {
                Ok(McpServerTransportConfig::StreamableHttp { url: self.url()? })
            }
            other => Err(format!(
                "unsupported MCP server type '{other}' for server '{}'",
                self.name
            )),
        }
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    fn url(&self) -> Result<String, String> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                format!(
                    "MCP server '{}' of type {} needs a `url`",
                    self.name, self.transport_type
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(toml_src: &str) -> McpServerConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn stdio_is_the_default_transport() {
        let cfg = spec(
            r#"
            name = "files"
            command = "mcp-files"
            args = ["--root", "/tmp"]
            "#,
        );
        assert_eq!(
            cfg.transport(),
            Ok(McpServerTransportConfig::Stdio {
                command: "mcp-files".to_string(),
                args: vec!["--root".to_string(), "/tmp".to_string()],
                env: HashMap::new(),
            })
        );
        assert!(!cfg.autoconnect);
    }

    #[test]
    fn http_aliases_resolve_to_streamable_http() {
        for alias in ["streamable-http", "streamable_http", "http"] {
            let cfg = spec(&format!(
                "name = \"remote\"\ntype = \"{alias}\"\nurl = \"http://localhost:9000/mcp\""
            ));
            assert_eq!(
                cfg.transport(),
                Ok(McpServerTransportConfig::StreamableHttp {
                    url: "http://localhost:9000/mcp".to_string()
                })
            );
        }
    }

    #[test]
    fn malformed_entries_are_reported_at_resolution() {
        let missing_url = spec("name = \"events\"\ntype = \"sse\"");
        assert!(missing_url.transport().is_err());

        let unknown = spec("name = \"odd\"\ntype = \"carrier-pigeon\"\ncommand = \"x\"");
        let err = unknown.transport().unwrap_err();
        assert!(err.contains("carrier-pigeon"), "{err}");
    }
}
