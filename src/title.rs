use crate::constants::{GREETING_VOCABULARY, SENTINEL_TITLE, TITLE_MAX_CHARS};
use crate::providers::ModelConfig;
use crate::store::{Chat, ConversationStore};
use crate::str_utils::prefix_chars;
use crate::stream_parser::{extract_message_content, SseParser, StreamEvent};
use crate::transport::{OutgoingCall, Transport, UpstreamBody};
use crate::types::{ChatId, ChorusError, Result};
use crate::wire::{ChatRequest, WireMessage};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing_error::SpanTrace;

/// What the title rule wants done for a chat right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleDecision {
    /// Nothing to do: already titled, or no user message yet.
    Keep,
    /// First message was a bare greeting; park on the sentinel until a
    /// real topic arrives.
    Sentinel,
    /// Summarize this seed text into a title.
    Derive(String),
}

pub fn title_decision(chat: &Chat) -> TitleDecision {
    let users: Vec<&str> = chat
        .user_messages()
        .map(|(_, m)| m.content.as_str())
        .collect();
    let Some(first) = users.first() else {
        return TitleDecision::Keep;
    };

    match chat.title.as_deref() {
        Some(title) if title == SENTINEL_TITLE => match users.get(1) {
            Some(second) => TitleDecision::Derive(second.to_string()),
            None => TitleDecision::Keep,
        },
        Some(_) => TitleDecision::Keep,
        None => {
            if is_greeting(first) {
                match users.get(1) {
                    Some(second) => TitleDecision::Derive(second.to_string()),
                    None => TitleDecision::Sentinel,
                }
            } else {
                TitleDecision::Derive(first.to_string())
            }
        }
    }
}

/// Case-insensitive, punctuation-stripped membership test against the fixed
/// greeting vocabulary.
pub fn is_greeting(text: &str) -> bool {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() || c.is_whitespace() {
            cleaned.push(c);
        }
    }
    let normalized = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    GREETING_VOCABULARY.contains(&normalized.as_str())
}

/// One-shot, non-streamed summarization of the seed message into a short
/// chat title. Falls back to plain truncation when the call fails.
pub struct ChatTitleGenerator {
    transport: Arc<dyn Transport>,
    model: ModelConfig,
    max_chars: usize,
}

impl ChatTitleGenerator {
    pub fn new(transport: Arc<dyn Transport>, model: ModelConfig) -> Self {
        Self {
            transport,
            model,
            max_chars: TITLE_MAX_CHARS,
        }
    }

    /// Apply the title rule to the chat, calling upstream only when a title
    /// actually needs deriving. Errors end in the truncation fallback, so
    /// this never leaves a derivable chat untitled.
    pub async fn ensure_title(&self, store: &ConversationStore, chat_id: &ChatId) {
        let Some(chat) = store.chat(chat_id) else {
            return;
        };
        match title_decision(&chat) {
            TitleDecision::Keep => {}
            TitleDecision::Sentinel => {
                if let Err(error) = store.set_title(chat_id, SENTINEL_TITLE) {
                    tracing::warn!("Failed to set sentinel title: {}", error.inner);
                }
            }
            TitleDecision::Derive(seed) => {
                let title = match self.summarize(&seed).await {
                    Ok(title) => title,
                    Err(error) => {
                        tracing::warn!(
                            "Title generation failed ({}); falling back to truncation",
                            error.inner
                        );
                        truncate_title(&seed, self.max_chars)
                    }
                };
                if let Err(error) = store.set_title(chat_id, title) {
                    tracing::warn!("Failed to set chat title: {}", error.inner);
                }
            }
        }
    }

    async fn summarize(&self, seed: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the user's message into a conversation title of at most {} characters. \
             Reply with the title only, no quotes.",
            self.max_chars
        );
        let call = OutgoingCall {
            endpoint: self.model.adapter.endpoint.clone(),
            auth: self.model.adapter.auth,
            body: ChatRequest::one_shot(
                self.model.id.clone(),
                vec![WireMessage::system(prompt), WireMessage::user_text(seed)],
            ),
        };

        let raw = match self.transport.fetch(call).await? {
            UpstreamBody::Json(value) => extract_message_content(&value),
            // Some hosts stream regardless of `stream: false`; accept both
            // transports for the same logical call.
            UpstreamBody::Events(mut stream) => {
                let mut parser = SseParser::new();
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(ChorusError::Io)?;
                    for event in parser.push(&chunk) {
                        if let StreamEvent::Content(delta) = event {
                            text.push_str(&delta);
                        }
                    }
                }
                for event in parser.finish() {
                    if let StreamEvent::Content(delta) = event {
                        text.push_str(&delta);
                    }
                }
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        };

        match raw {
            Some(text) => Ok(truncate_title(&text, self.max_chars)),
            None => Err(ChorusError::Internal(
                "title call returned no content".to_string(),
                SpanTrace::capture(),
            )
            .into()),
        }
    }
}

/// First line of the text, capped to `max_chars` on a UTF-8 boundary.
pub fn truncate_title(text: &str, max_chars: usize) -> String {
    let first_line = text
        .trim()
        .trim_matches('"')
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    let capped = prefix_chars(first_line, max_chars).trim_end();
    if capped.len() < first_line.len() {
        format!("{}…", capped)
    } else {
        capped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConversationStore;

    #[test]
    fn greeting_detection_strips_case_and_punctuation() {
        assert!(is_greeting("hi"));
        assert!(is_greeting("Hello!!"));
        assert!(is_greeting("  good MORNING. "));
        assert!(is_greeting("what's up?"));
        assert!(!is_greeting("hi, can you explain recursion"));
        assert!(!is_greeting("Explain recursion"));
        assert!(!is_greeting(""));
    }

    #[test]
    fn greeting_opener_parks_on_sentinel_until_second_message() {
        let store = ConversationStore::new();
        let id = store.create_chat();
        store
            .add_user_message(&id, "hi", vec![], vec![])
            .expect("add");
        let chat = store.chat(&id).expect("chat");
        assert_eq!(title_decision(&chat), TitleDecision::Sentinel);

        store.set_title(&id, SENTINEL_TITLE).expect("title");
        store
            .add_user_message(&id, "Explain recursion", vec![], vec![])
            .expect("add");
        let chat = store.chat(&id).expect("chat");
        assert_eq!(
            title_decision(&chat),
            TitleDecision::Derive("Explain recursion".to_string())
        );
    }

    #[test]
    fn substantive_opener_derives_immediately() {
        let store = ConversationStore::new();
        let id = store.create_chat();
        store
            .add_user_message(&id, "Explain recursion", vec![], vec![])
            .expect("add");
        let chat = store.chat(&id).expect("chat");
        assert_eq!(
            title_decision(&chat),
            TitleDecision::Derive("Explain recursion".to_string())
        );
    }

    #[test]
    fn titled_chat_is_left_alone() {
        let store = ConversationStore::new();
        let id = store.create_chat();
        store
            .add_user_message(&id, "Explain recursion", vec![], vec![])
            .expect("add");
        store.set_title(&id, "Recursion basics").expect("title");
        let chat = store.chat(&id).expect("chat");
        assert_eq!(title_decision(&chat), TitleDecision::Keep);
    }

    #[test]
    fn empty_chat_needs_nothing() {
        let store = ConversationStore::new();
        let id = store.create_chat();
        let chat = store.chat(&id).expect("chat");
        assert_eq!(title_decision(&chat), TitleDecision::Keep);
    }

    #[test]
    fn truncation_caps_and_marks() {
        assert_eq!(truncate_title("Short title", 48), "Short title");
        assert_eq!(
            truncate_title("\"Quoted answer\"\nsecond line", 48),
            "Quoted answer"
        );
        let long = "A very long first user message that keeps going and going";
        let capped = truncate_title(long, 16);
        assert!(capped.ends_with('…'));
        assert!(capped.chars().count() <= 17);
    }
}
