use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use rmcp::model::CallToolResult;
use rmcp::model::RawContent;

/// Error returned when a request to the server did not complete within the
/// configured bound. Callers can tell it apart from other failures with
/// `anyhow::Error::downcast_ref::<RequestTimeout>()`.
#[derive(Debug, thiserror::Error)]
#[error("timed out awaiting {label} after {duration:?}")]
pub struct RequestTimeout {
    pub label: String,
    pub duration: Duration,
}

pub(crate) async fn run_with_timeout<F, T, E>(
    fut: F,
    timeout: Option<Duration>,
    label: &str,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match timeout {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result.map_err(|err| anyhow!("{label} failed: {err}")),
            Err(_) => Err(RequestTimeout {
                label: label.to_string(),
                duration,
            }
            .into()),
        },
        None => fut.await.map_err(|err| anyhow!("{label} failed: {err}")),
    }
}

/// Environment variables forwarded from the parent process to stdio servers.
/// Everything else is cleared so servers do not inherit secrets by accident.
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "HOME",
    "LOGNAME",
    "PATH",
    "SHELL",
    "USER",
    "__CF_USER_TEXT_ENCODING",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "TZ",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH",
    "PATHEXT",
    "USERNAME",
    "USERDOMAIN",
    "USERPROFILE",
    "TEMP",
    "TMP",
];

pub(crate) fn create_env_for_mcp_server(
    extra_env: Option<HashMap<String, String>>,
) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|var| match std::env::var(var) {
            Ok(value) => Some((var.to_string(), value)),
            Err(_) => None,
        })
        .chain(extra_env.unwrap_or_default())
        .collect()
}

/// Build the HTTP client shared by the streamable-HTTP and SSE transports.
pub(crate) fn build_http_client(
    bearer_token: Option<&str>,
    headers: &HashMap<String, String>,
) -> Result<reqwest::Client> {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{name}`"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header `{name}`"))?;
        header_map.insert(name, value);
    }
    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("invalid bearer token")?;
        header_map.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(header_map)
        .build()
        .context("failed to build HTTP client")
}

/// Flatten the text parts of a tool result. Structured content is rendered
/// as JSON when the server returned no text at all.
pub fn text_from_call_tool_result(result: &CallToolResult) -> String {
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter_map(|content| match &content.raw {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect();

    match (&result.structured_content, texts.is_empty()) {
        (Some(structured), true) => structured.to_string(),
        _ => texts.join("\n"),
    }
}
