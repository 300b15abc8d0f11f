use crate::constants::{FIRST_BYTE_TIMEOUT_SECS, RETRY_BASE_DELAY_MS};
use crate::logging::StreamMetric;
use crate::providers::{ModelConfig, ReasoningStyle};
use crate::store::{ConversationStore, ResponsePatch};
use crate::stream_parser::{
    extract_message_content, extract_message_reasoning, extract_upstream_error, SseParser,
    StreamEvent,
};
use crate::think_tag::ThinkTagExtractor;
use crate::transport::{OutgoingCall, Transport, UpstreamBody};
use crate::types::{ChatId, ChorusError, ObservedError};
use crate::wire::{ChatRequest, WireMessage};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Tunable thresholds for one streaming session. Exact numbers are
/// configuration, not protocol.
#[derive(Debug, Clone)]
pub struct StreamPolicy {
    /// How long to wait for the first byte of reasoning/content before the
    /// attempt is declared dead. Disarmed once anything has arrived.
    pub first_byte_timeout: Duration,
    /// Attempts against the primary id before the fallback id is tried.
    pub max_primary_attempts: u32,
    /// Base delay between attempt tiers; doubled per tier, jittered ±25%.
    pub retry_base_delay: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            first_byte_timeout: Duration::from_secs(FIRST_BYTE_TIMEOUT_SECS),
            max_primary_attempts: 2,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

/// Terminal-inclusive lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Errored,
    Stopped,
    Unsupported,
}

enum AttemptOutcome {
    /// Deltas were delivered and the stream ended normally.
    Completed,
    /// Stream ended with zero content and zero reasoning.
    Empty,
    /// Transport or upstream failure.
    Failed(ObservedError),
    /// First-byte watchdog fired.
    TimedOut,
    /// User pressed stop.
    Cancelled,
}

/// Drives one model's request/response lifecycle: issues the call, decodes
/// the stream, applies the tiered retry/fallback policy and merges every
/// delta into this model's response slot.
pub struct ModelStreamSession {
    store: Arc<ConversationStore>,
    transport: Arc<dyn Transport>,
    policy: StreamPolicy,
    model: ModelConfig,
    chat_id: ChatId,
    msg_index: usize,
    history: Vec<WireMessage>,
    message_has_images: bool,
    token: CancellationToken,
}

impl ModelStreamSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConversationStore>,
        transport: Arc<dyn Transport>,
        policy: StreamPolicy,
        model: ModelConfig,
        chat_id: ChatId,
        msg_index: usize,
        history: Vec<WireMessage>,
        message_has_images: bool,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            model,
            chat_id,
            msg_index,
            history,
            message_has_images,
            token: CancellationToken::new(),
        }
    }

    /// Bind this session to an externally-owned token (the orchestrator's
    /// per-batch parent).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run(self) -> SessionState {
        self.trace_state(SessionState::Idle);
        if self.message_has_images && !self.model.supports_vision {
            let message = format!(
                "{} cannot read image attachments",
                self.model.display_name
            );
            tracing::warn!("[{}] {}", self.model.id, message);
            self.patch(ResponsePatch::unsupported(message));
            return SessionState::Unsupported;
        }

        let mut plan: Vec<&str> = Vec::new();
        for _ in 0..self.policy.max_primary_attempts {
            plan.push(self.model.id.as_str());
        }
        if let Some(fallback) = self.model.fallback_id.as_deref() {
            plan.push(fallback);
        }

        let mut last_failure = String::from("no attempts were made");
        for (attempt, model_id) in plan.iter().enumerate() {
            let attempt = attempt as u32;
            if attempt > 0 && self.backoff_interrupted(attempt).await {
                self.patch(ResponsePatch::stopped());
                return SessionState::Stopped;
            }

            match self.attempt(model_id, attempt).await {
                AttemptOutcome::Completed => return SessionState::Completed,
                AttemptOutcome::Cancelled => {
                    tracing::debug!("[{}] session stopped by user", self.model.id);
                    self.patch(ResponsePatch::stopped());
                    return SessionState::Stopped;
                }
                AttemptOutcome::Empty => {
                    last_failure = format!("{} returned an empty response", model_id);
                    tracing::warn!("[{}] attempt {} came back empty", model_id, attempt);
                }
                AttemptOutcome::TimedOut => {
                    last_failure = format!(
                        "{} sent nothing within {:?}",
                        model_id, self.policy.first_byte_timeout
                    );
                    tracing::warn!("[{}] attempt {} timed out before first byte", model_id, attempt);
                }
                AttemptOutcome::Failed(error) => {
                    last_failure = error.inner.to_string();
                    tracing::warn!("[{}] attempt {} failed: {}", model_id, attempt, error.inner);
                }
            }
        }

        self.patch(ResponsePatch::errored(last_failure));
        SessionState::Errored
    }

    /// One network attempt against `model_id`. Never retries on its own;
    /// the caller owns tier progression.
    async fn attempt(&self, model_id: &str, attempt: u32) -> AttemptOutcome {
        self.patch(ResponsePatch::fresh_attempt());
        let started = Instant::now();
        let mut tracker = DeltaTracker::new(self.model.adapter.reasoning);

        let call = OutgoingCall {
            endpoint: self.model.adapter.endpoint.clone(),
            auth: self.model.adapter.auth,
            body: ChatRequest::streaming(model_id, self.history.clone()),
        };
        self.trace_state(SessionState::Requesting);
        tracing::debug!("[{}] attempt {} -> {}", model_id, attempt, call.endpoint);

        let watchdog = tokio::time::sleep(self.policy.first_byte_timeout);
        tokio::pin!(watchdog);

        let mut fetch = self.transport.fetch(call);
        let body = tokio::select! {
            _ = self.token.cancelled() => return AttemptOutcome::Cancelled,
            _ = &mut watchdog => return AttemptOutcome::TimedOut,
            result = &mut fetch => match result {
                Ok(body) => body,
                Err(error) => return AttemptOutcome::Failed(error),
            },
        };

        let mut stream = match body {
            UpstreamBody::Json(value) => {
                if let Some(outcome) = self.consume_json(&value, &mut tracker) {
                    return outcome;
                }
                return self.finish_attempt(tracker, started, attempt, model_id);
            }
            UpstreamBody::Events(stream) => stream,
        };

        self.trace_state(SessionState::Streaming);
        let mut parser = SseParser::new();
        let mut done = false;
        while !done {
            let next_chunk = tokio::select! {
                _ = self.token.cancelled() => return AttemptOutcome::Cancelled,
                _ = &mut watchdog, if !tracker.saw_delta => return AttemptOutcome::TimedOut,
                chunk = stream.next() => chunk,
            };

            let (events, at_end) = match next_chunk {
                Some(Ok(bytes)) => (parser.push(&bytes), false),
                Some(Err(error)) => {
                    return AttemptOutcome::Failed(ChorusError::Io(error).into());
                }
                None => (parser.finish(), true),
            };

            for event in events {
                match event {
                    StreamEvent::Reasoning(delta) => self.patch(tracker.on_reasoning(&delta)),
                    StreamEvent::Content(delta) => self.patch(tracker.on_content(&delta)),
                    StreamEvent::Done => done = true,
                    StreamEvent::Upstream(message) => {
                        return AttemptOutcome::Failed(
                            ChorusError::Upstream(reqwest::StatusCode::BAD_GATEWAY, message)
                                .into(),
                        );
                    }
                }
            }
            if at_end {
                done = true;
            }
        }

        self.finish_attempt(tracker, started, attempt, model_id)
    }

    /// Non-streaming fallback shape: the whole answer in one JSON object.
    fn consume_json(
        &self,
        value: &serde_json::Value,
        tracker: &mut DeltaTracker,
    ) -> Option<AttemptOutcome> {
        if let Some(message) = extract_upstream_error(value) {
            return Some(AttemptOutcome::Failed(
                ChorusError::Upstream(reqwest::StatusCode::BAD_GATEWAY, message).into(),
            ));
        }
        if let Some(reasoning) = extract_message_reasoning(value) {
            self.patch(tracker.on_reasoning(&reasoning));
        }
        if let Some(content) = extract_message_content(value) {
            self.patch(tracker.on_content(&content));
        }
        None
    }

    fn finish_attempt(
        &self,
        mut tracker: DeltaTracker,
        started: Instant,
        attempt: u32,
        model_id: &str,
    ) -> AttemptOutcome {
        if !tracker.has_output() {
            return AttemptOutcome::Empty;
        }
        self.patch(tracker.finish());
        tracker.metric.log_summary(model_id, attempt, started.elapsed());
        AttemptOutcome::Completed
    }

    /// Sleep the jittered tier delay; true when stop arrived first.
    async fn backoff_interrupted(&self, attempt: u32) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        let base = self.policy.retry_base_delay.as_millis() as u64 * 2u64.pow(attempt - 1);
        let jitter_range = base / 4;
        let jitter = if jitter_range > 0 {
            fastrand::i64(-(jitter_range as i64)..jitter_range as i64)
        } else {
            0
        };
        let delay = Duration::from_millis((base as i64 + jitter).max(1) as u64);
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn trace_state(&self, state: SessionState) {
        tracing::trace!("[{}] session state -> {:?}", self.model.id, state);
    }

    fn patch(&self, patch: ResponsePatch) {
        if let Err(error) =
            self.store
                .update_response(&self.chat_id, &self.model.id, self.msg_index, patch)
        {
            tracing::warn!(
                "Dropping response update for {}: {}",
                self.model.id,
                error.inner
            );
        }
    }
}

/// Accumulates deltas for one attempt and produces slot patches.
///
/// Owns the reasoning→answer transition: `thinking_time` is computed once,
/// from (transition instant − first reasoning instant), then frozen.
struct DeltaTracker {
    style: ReasoningStyle,
    tag: ThinkTagExtractor,
    content: String,
    thinking: String,
    thinking_time: Option<String>,
    first_reasoning_at: Option<Instant>,
    saw_delta: bool,
    metric: StreamMetric,
}

impl DeltaTracker {
    fn new(style: ReasoningStyle) -> Self {
        Self {
            style,
            tag: ThinkTagExtractor::new(),
            content: String::new(),
            thinking: String::new(),
            thinking_time: None,
            first_reasoning_at: None,
            saw_delta: false,
            metric: StreamMetric::new(),
        }
    }

    fn on_reasoning(&mut self, delta: &str) -> ResponsePatch {
        self.saw_delta = true;
        if self.first_reasoning_at.is_none() {
            self.first_reasoning_at = Some(Instant::now());
        }
        self.thinking.push_str(delta);
        self.metric.record_thinking(delta);
        self.snapshot_patch()
    }

    fn on_content(&mut self, delta: &str) -> ResponsePatch {
        self.saw_delta = true;
        self.metric.record_content(delta);
        match self.style {
            ReasoningStyle::SeparateField => {
                if !self.thinking.is_empty() && self.thinking_time.is_none() {
                    self.freeze_thinking_clock();
                }
                self.content.push_str(delta);
            }
            ReasoningStyle::InlineThinkTags => {
                let split = self.tag.push(delta);
                if split.thinking.is_some() && self.first_reasoning_at.is_none() {
                    self.first_reasoning_at = Some(Instant::now());
                }
                if split.closed {
                    self.freeze_thinking_clock();
                }
                self.thinking = split.thinking.unwrap_or_default();
                self.content = split.content;
            }
        }
        self.snapshot_patch()
    }

    fn freeze_thinking_clock(&mut self) {
        let since = match self.first_reasoning_at {
            Some(at) => at.elapsed(),
            None => Duration::ZERO,
        };
        self.thinking_time = Some(format_thinking_duration(since));
    }

    fn has_output(&self) -> bool {
        !self.content.is_empty() || !self.thinking.is_empty()
    }

    fn snapshot_patch(&self) -> ResponsePatch {
        ResponsePatch {
            content: Some(self.content.clone()),
            thinking: if self.thinking.is_empty() {
                None
            } else {
                Some(self.thinking.clone())
            },
            thinking_time: self.thinking_time.clone(),
            streaming: Some(true),
            ..Default::default()
        }
    }

    fn finish(&mut self) -> ResponsePatch {
        // A stream that was all reasoning still gets its clock fixed.
        if !self.thinking.is_empty() && self.thinking_time.is_none() {
            self.freeze_thinking_clock();
        }
        let mut patch = self.snapshot_patch();
        patch.streaming = Some(false);
        patch
    }
}

fn format_thinking_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let total = elapsed.as_secs();
        format!("{}m {}s", total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_grows_monotonically_for_separate_field_style() {
        let mut tracker = DeltaTracker::new(ReasoningStyle::SeparateField);
        let mut previous = String::new();
        for delta in ["The ", "answer ", "is ", "4."] {
            let patch = tracker.on_content(delta);
            let current = patch.content.expect("content set");
            assert!(current.starts_with(&previous), "content shrank mid-stream");
            previous = current;
        }
        assert_eq!(previous, "The answer is 4.");
    }

    #[test]
    fn thinking_time_is_frozen_at_transition() {
        let mut tracker = DeltaTracker::new(ReasoningStyle::SeparateField);
        tracker.on_reasoning("let me think");
        assert!(tracker.thinking_time.is_none());

        let at_transition = tracker.on_content("The answer");
        let frozen = at_transition.thinking_time.expect("frozen at transition");

        std::thread::sleep(Duration::from_millis(20));
        let later = tracker.on_content(" is 4.");
        assert_eq!(later.thinking_time.as_deref(), Some(frozen.as_str()));

        let terminal = tracker.finish();
        assert_eq!(terminal.thinking_time.as_deref(), Some(frozen.as_str()));
        assert_eq!(terminal.streaming, Some(false));
    }

    #[test]
    fn inline_tags_split_into_thinking_and_answer() {
        let mut tracker = DeltaTracker::new(ReasoningStyle::InlineThinkTags);
        let patch = tracker.on_content("<think>step one</think>The answer is 4");
        assert_eq!(patch.thinking.as_deref(), Some("step one"));
        assert_eq!(patch.content.as_deref(), Some("The answer is 4"));
        assert!(patch.thinking_time.is_some());
    }

    #[test]
    fn reasoning_only_stream_gets_clock_fixed_at_finish() {
        let mut tracker = DeltaTracker::new(ReasoningStyle::SeparateField);
        tracker.on_reasoning("all thought, no answer");
        let terminal = tracker.finish();
        assert!(terminal.thinking_time.is_some());
        assert!(tracker.has_output());
    }

    #[test]
    fn empty_attempt_has_no_output() {
        let tracker = DeltaTracker::new(ReasoningStyle::SeparateField);
        assert!(!tracker.has_output());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_thinking_duration(Duration::from_millis(2540)), "2.5s");
        assert_eq!(format_thinking_duration(Duration::from_secs(75)), "1m 15s");
    }
}
