use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::config_types::OpenRouterConfig;
use crate::debug_logger::DebugLogger;
use crate::error::Result;
use crate::error::TmuxaiErr;
use crate::protocol::ChatMessage;
use crate::util::backoff;

/// Request/response text service used for every decision and summary.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// `messages` is the full context; nothing is remembered between calls.
    async fn generate(&self, messages: &[ChatMessage], model_override: Option<&str>)
    -> Result<String>;
}

/// Role of the message at `index` on the wire. A leading message that did not
/// come from the user carries the instructions.
pub fn role_for(index: usize, msg: &ChatMessage) -> &'static str {
    if index == 0 && !msg.from_user {
        "system"
    } else if msg.from_user {
        "user"
    } else {
        "assistant"
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI compatible `/chat/completions` endpoints, OpenRouter by
/// default.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u64,
    debug_logger: DebugLogger,
}

impl ChatCompletionsClient {
    pub fn new(cfg: &OpenRouterConfig, debug_logger: DebugLogger) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            return Err(TmuxaiErr::ConfigInvalid(
                "OpenRouter API key is required. Set it in the config file or as an environment variable: TMUXAI_OPENROUTER_API_KEY".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_sec))
            .build()
            .map_err(|e| TmuxaiErr::CompletionService(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_retries: cfg.max_retries,
            debug_logger,
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
    ) -> Result<String> {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .enumerate()
            .map(|(i, msg)| json!({"role": role_for(i, msg), "content": msg.content}))
            .collect();

        let model = model_override
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.model.as_str());
        let payload = json!({
            "model": model,
            "messages": wire_messages,
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!("Sending {} messages to {model}", messages.len());
        debug!(url, "POST (chat)");
        trace!("request payload: {payload}");

        let mut attempt = 0;
        loop {
            attempt += 1;

            let res = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("X-Title", "tmuxai")
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(resp) if resp.status().is_success() => {
                    let body: ChatCompletionResponse = resp.json().await.map_err(|e| {
                        TmuxaiErr::CompletionService(format!("invalid response body: {e}"))
                    })?;
                    let content = body
                        .choices
                        .into_iter()
                        .next()
                        .map(|choice| choice.message.content.unwrap_or_default())
                        .ok_or_else(|| {
                            TmuxaiErr::CompletionService(
                                "response contained no choices".to_string(),
                            )
                        })?;

                    debug!("received response ({} characters)", content.len());
                    self.debug_logger.log_exchange(messages, &content);
                    return Ok(content);
                }
                Ok(res) => {
                    let status = res.status();
                    if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                        let body = (res.text().await).unwrap_or_default();
                        return Err(TmuxaiErr::CompletionService(format!(
                            "unexpected status {status}: {body}"
                        )));
                    }

                    if attempt > self.max_retries {
                        return Err(TmuxaiErr::CompletionService(format!(
                            "exceeded retry limit, last status: {status}"
                        )));
                    }

                    let retry_after_secs = res
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok());

                    let delay = retry_after_secs
                        .map(|s| Duration::from_millis(s * 1_000))
                        .unwrap_or_else(|| backoff(attempt));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > self.max_retries {
                        return Err(TmuxaiErr::CompletionService(e.to_string()));
                    }
                    let delay = backoff(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
