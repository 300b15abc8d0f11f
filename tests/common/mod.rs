#![allow(dead_code)]

use bytes::Bytes;
use chorus::providers::{ModelConfig, ProviderAdapter};
use chorus::session::StreamPolicy;
use chorus::store::ConversationStore;
use chorus::transport::{ByteStream, OutgoingCall, Transport, UpstreamBody};
use chorus::types::{ChatId, ChorusError, Result};
use chorus::wire::ChatRequest;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// What one scripted upstream call does.
pub enum ScriptStep {
    /// SSE body delivered one element per network chunk.
    Stream(Vec<String>),
    /// SSE chunks followed by a stall that never ends.
    StreamThenHang(Vec<String>),
    /// Non-streaming single-object response.
    Json(serde_json::Value),
    /// Transport-level failure.
    Fail(String),
    /// Never produces a body; exercises the watchdog and cancellation.
    Hang,
}

/// Transport double with a per-model script of outcomes, popped in call
/// order, plus a record of every request issued.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, model: &str, steps: Vec<ScriptStep>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.model == model)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn fetch(&self, call: OutgoingCall) -> BoxFuture<'static, Result<UpstreamBody>> {
        self.calls.lock().unwrap().push(call.body.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&call.body.model)
            .and_then(|queue| queue.pop_front());
        Box::pin(async move {
            match step {
                Some(ScriptStep::Stream(chunks)) => {
                    let stream: ByteStream =
                        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
                            .boxed();
                    Ok(UpstreamBody::Events(stream))
                }
                Some(ScriptStep::StreamThenHang(chunks)) => {
                    let head =
                        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
                    let stream: ByteStream = head.chain(futures_util::stream::pending()).boxed();
                    Ok(UpstreamBody::Events(stream))
                }
                Some(ScriptStep::Json(value)) => Ok(UpstreamBody::Json(value)),
                Some(ScriptStep::Fail(message)) => {
                    Err(ChorusError::Io(std::io::Error::other(message)).into())
                }
                Some(ScriptStep::Hang) => {
                    futures_util::future::pending::<()>().await;
                    unreachable!("pending future resolved")
                }
                None => Err(ChorusError::Io(std::io::Error::other(
                    "no script left for this model",
                ))
                .into()),
            }
        })
    }
}

/// SSE stream of content deltas terminated by the done sentinel.
pub fn content_stream(deltas: &[&str]) -> ScriptStep {
    let mut chunks: Vec<String> = deltas
        .iter()
        .map(|d| {
            format!(
                "data: {}\n",
                serde_json::json!({"choices": [{"delta": {"content": d}}]})
            )
        })
        .collect();
    chunks.push("data: [DONE]\n".to_string());
    ScriptStep::Stream(chunks)
}

/// SSE stream that completes without ever carrying content.
pub fn empty_stream() -> ScriptStep {
    ScriptStep::Stream(vec!["data: [DONE]\n".to_string()])
}

/// Raw SSE lines, one chunk each, without an implicit done sentinel.
pub fn sse_lines(lines: &[&str]) -> ScriptStep {
    ScriptStep::Stream(lines.iter().map(|l| format!("{}\n", l)).collect())
}

pub fn json_answer(content: &str) -> ScriptStep {
    ScriptStep::Json(serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

pub fn model(id: &str) -> ModelConfig {
    ModelConfig::new(
        id,
        ProviderAdapter::openai_compatible("standard", "https://api.example.com"),
    )
}

/// Thresholds small enough that timeout tiers run in test time.
pub fn fast_policy() -> StreamPolicy {
    StreamPolicy {
        first_byte_timeout: Duration::from_millis(50),
        max_primary_attempts: 2,
        retry_base_delay: Duration::from_millis(5),
    }
}

/// Poll for a title set by the fire-and-forget generation task.
pub async fn wait_for_title(store: &ConversationStore, chat: &ChatId) -> Option<String> {
    for _ in 0..100 {
        if let Some(title) = store.title(chat) {
            return Some(title);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
