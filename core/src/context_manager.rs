//! Keeps the chat history under the configured token ceiling.

use tracing::info;
use tracing::warn;

use crate::chat_completions::CompletionClient;
use crate::error::Result;
use crate::protocol::ChatMessage;

/// Approximate token count: characters divided by `chars_per_token`,
/// rounded up. Only meant for threshold checks.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(chars_per_token.max(1))
}

#[derive(Debug, Clone, Copy)]
pub struct ContextManager {
    chars_per_token: usize,
}

impl ContextManager {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn history_tokens(&self, history: &[ChatMessage]) -> usize {
        history
            .iter()
            .map(|msg| estimate_tokens(&msg.content, self.chars_per_token))
            .sum()
    }

    pub fn needs_squash(&self, history: &[ChatMessage], max_context_size: usize) -> bool {
        self.history_tokens(history) > max_context_size
    }

    /// Replace everything except a trailing user message with a single
    /// summary message. Returns `false` when there was nothing to squash.
    /// On error the history is left untouched.
    pub async fn squash(
        &self,
        history: &mut Vec<ChatMessage>,
        client: &dyn CompletionClient,
        model: Option<&str>,
        instruction: &str,
    ) -> Result<bool> {
        if history.len() <= 1 {
            return Ok(false);
        }

        let keep_pending = history.last().is_some_and(|msg| msg.from_user);
        let summarized_len = if keep_pending {
            history.len() - 1
        } else {
            history.len()
        };

        let mut request: Vec<ChatMessage> = history[..summarized_len].to_vec();
        request.push(ChatMessage::user(instruction));

        let before = self.history_tokens(history);
        let summary = match client.generate(&request, model).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!("failed to squash history: {err}");
                return Err(err);
            }
        };

        let pending = if keep_pending { history.pop() } else { None };
        history.clear();
        history.push(ChatMessage::assistant(summary.trim()));
        history.extend(pending);

        info!(
            "squashed {summarized_len} messages, ~{before} -> ~{} tokens",
            self.history_tokens(history)
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TmuxaiErr;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FakeClient {
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl FakeClient {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err("boom".to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeClient {
        async fn generate(&self, messages: &[ChatMessage], _model: Option<&str>) -> Result<String> {
            *self.seen.lock().unwrap() = messages.to_vec();
            self.reply.clone().map_err(TmuxaiErr::CompletionService)
        }
    }

    fn contents(history: &[ChatMessage]) -> Vec<(&str, bool)> {
        history
            .iter()
            .map(|m| (m.content.as_str(), m.from_user))
            .collect()
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abcd", 4), 1);
        assert_eq!(estimate_tokens("abcde", 4), 2);
        assert_eq!(estimate_tokens("abc", 0), 3);
    }

    #[test]
    fn squash_threshold_is_exclusive() {
        let manager = ContextManager::new(1);
        let history = vec![ChatMessage::user("x".repeat(100))];
        assert!(!manager.needs_squash(&history, 100));
        assert!(manager.needs_squash(&history, 99));
    }

    #[tokio::test]
    async fn squash_keeps_pending_user_message() {
        let manager = ContextManager::new(1);
        let client = FakeClient::replying("summary of work\n");
        let mut history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("latest"),
        ];

        let squashed = manager
            .squash(&mut history, &client, None, "summarize")
            .await
            .unwrap();

        assert!(squashed);
        assert_eq!(
            contents(&history),
            vec![("summary of work", false), ("latest", true)]
        );
        let seen = client.seen.lock().unwrap();
        assert_eq!(
            contents(&seen),
            vec![("first", true), ("reply", false), ("summarize", true)]
        );
    }

    #[tokio::test]
    async fn squash_without_pending_leaves_only_summary() {
        let manager = ContextManager::new(1);
        let client = FakeClient::replying("short");
        let mut history = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];

        manager
            .squash(&mut history, &client, None, "summarize")
            .await
            .unwrap();

        assert_eq!(contents(&history), vec![("short", false)]);
    }

    #[tokio::test]
    async fn single_message_is_not_squashed() {
        let manager = ContextManager::new(1);
        let client = FakeClient::failing();
        let mut history = vec![ChatMessage::user("x".repeat(500))];

        let squashed = manager
            .squash(&mut history, &client, None, "summarize")
            .await
            .unwrap();

        assert!(!squashed);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn failed_squash_leaves_history_untouched() {
        let manager = ContextManager::new(1);
        let client = FakeClient::failing();
        let mut history = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let before = history.clone();

        let err = manager
            .squash(&mut history, &client, None, "summarize")
            .await
            .unwrap_err();

        assert!(matches!(err, TmuxaiErr::CompletionService(_)));
        assert_eq!(history, before);
    }
}
