/// Per-attempt stream accounting, summarized once at finish so a noisy
/// token stream costs one log line instead of thousands.
#[derive(Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub content_chars: usize,
    pub thinking_chars: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_content(&mut self, delta: &str) {
        self.chunks += 1;
        self.content_chars += delta.chars().count();
    }

    pub fn record_thinking(&mut self, delta: &str) {
        self.chunks += 1;
        self.thinking_chars += delta.chars().count();
    }

    pub fn log_summary(&self, model_id: &str, attempt: u32, latency: std::time::Duration) {
        tracing::info!(
            "Stream finished for {} (attempt {}). Latency: {:?} | Chunks: {} | Text: {} chars | Thought: {} chars",
            model_id,
            attempt,
            latency,
            self.chunks,
            self.content_chars,
            self.thinking_chars
        );
    }
}
