use crate::constants::{THINK_CLOSE_TAG, THINK_OPEN_TAG};

/// Where the extractor is in the `<think>...</think>` lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    NoTag,
    InsideThink,
    AfterThink,
}

/// Snapshot of the reconstructed split after one delta.
///
/// Same shape whether reasoning came from a native field or inline tags, so
/// downstream consumers never know which path produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSplit {
    pub thinking: Option<String>,
    pub content: String,
    /// True exactly once: on the update where `</think>` first appeared.
    pub closed: bool,
}

/// Reconstructs a thinking/answer split for providers that inline reasoning
/// as literal `<think>...</think>` markers in the content stream.
///
/// Accumulates all content deltas for one session and re-evaluates the split
/// on each push. The closing-tag transition fires exactly once; callers use
/// it to freeze the thinking clock.
pub struct ThinkTagExtractor {
    acc: String,
    state: TagState,
    /// Byte offset just past `<think>` once seen.
    think_start: usize,
    /// Byte offset just past `</think>` once seen.
    answer_start: usize,
    /// Final thinking text, fixed at the close transition.
    frozen_thinking: String,
}

impl ThinkTagExtractor {
    pub fn new() -> Self {
        Self {
            acc: String::new(),
            state: TagState::NoTag,
            think_start: 0,
            answer_start: 0,
            frozen_thinking: String::new(),
        }
    }

    pub fn state(&self) -> TagState {
        self.state
    }

    /// Append one content delta and return the current split.
    pub fn push(&mut self, delta: &str) -> TagSplit {
        self.acc.push_str(delta);
        self.evaluate()
    }

    fn evaluate(&mut self) -> TagSplit {
        if self.state == TagState::NoTag {
            if let Some(open) = self.acc.find(THINK_OPEN_TAG) {
                self.state = TagState::InsideThink;
                self.think_start = open + THINK_OPEN_TAG.len();
            }
        }

        match self.state {
            TagState::NoTag => {
                // Hold content back while the text could still turn out to be
                // the opening tag split across deltas.
                let content = if self.is_partial_open_tag() {
                    String::new()
                } else {
                    self.acc.clone()
                };
                TagSplit {
                    thinking: None,
                    content,
                    closed: false,
                }
            }
            TagState::InsideThink => {
                if let Some(close) = self.acc[self.think_start..].find(THINK_CLOSE_TAG) {
                    let close_at = self.think_start + close;
                    self.frozen_thinking = self.acc[self.think_start..close_at].trim().to_string();
                    self.answer_start = close_at + THINK_CLOSE_TAG.len();
                    self.state = TagState::AfterThink;
                    TagSplit {
                        thinking: Some(self.frozen_thinking.clone()),
                        content: self.acc[self.answer_start..].trim().to_string(),
                        closed: true,
                    }
                } else {
                    TagSplit {
                        thinking: Some(self.acc[self.think_start..].to_string()),
                        content: String::new(),
                        closed: false,
                    }
                }
            }
            TagState::AfterThink => TagSplit {
                thinking: Some(self.frozen_thinking.clone()),
                content: self.acc[self.answer_start..].trim().to_string(),
                closed: false,
            },
        }
    }

    fn is_partial_open_tag(&self) -> bool {
        let head = self.acc.trim_start();
        !head.is_empty() && head.len() < THINK_OPEN_TAG.len() && THINK_OPEN_TAG.starts_with(head)
    }
}

impl Default for ThinkTagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_tags_in_one_delta_transition_directly() {
        let mut x = ThinkTagExtractor::new();
        let split = x.push("<think>step one</think>The answer is 4");
        assert_eq!(split.thinking.as_deref(), Some("step one"));
        assert_eq!(split.content, "The answer is 4");
        assert!(split.closed);
        assert_eq!(x.state(), TagState::AfterThink);
    }

    #[test]
    fn tags_split_across_deltas() {
        let mut x = ThinkTagExtractor::new();

        let s1 = x.push("<th");
        assert_eq!(s1.thinking, None);
        assert_eq!(s1.content, "");

        let s2 = x.push("ink>let me ");
        assert_eq!(x.state(), TagState::InsideThink);
        assert_eq!(s2.thinking.as_deref(), Some("let me "));
        assert_eq!(s2.content, "");

        let s3 = x.push("reason</thi");
        assert_eq!(s3.thinking.as_deref(), Some("let me reason</thi"));
        assert!(!s3.closed);

        let s4 = x.push("nk> Done.");
        assert!(s4.closed);
        assert_eq!(s4.thinking.as_deref(), Some("let me reason"));
        assert_eq!(s4.content, "Done.");

        // Later deltas extend the answer without re-firing the transition.
        let s5 = x.push(" More.");
        assert!(!s5.closed);
        assert_eq!(s5.thinking.as_deref(), Some("let me reason"));
        assert_eq!(s5.content, "Done. More.");
    }

    #[test]
    fn plain_text_never_becomes_thinking() {
        let mut x = ThinkTagExtractor::new();
        let s1 = x.push("Just an ");
        assert_eq!(s1.thinking, None);
        assert_eq!(s1.content, "Just an ");
        let s2 = x.push("answer.");
        assert_eq!(s2.content, "Just an answer.");
        assert_eq!(x.state(), TagState::NoTag);
    }

    #[test]
    fn angle_bracket_text_that_is_not_the_tag_flows_through() {
        let mut x = ThinkTagExtractor::new();
        let split = x.push("<thermometer> reads 20C");
        assert_eq!(split.thinking, None);
        assert_eq!(split.content, "<thermometer> reads 20C");
    }

    #[test]
    fn thinking_is_trimmed_at_close() {
        let mut x = ThinkTagExtractor::new();
        x.push("<think>\n  pondering  \n</think>");
        let split = x.push("  answer");
        assert_eq!(split.thinking.as_deref(), Some("pondering"));
        assert_eq!(split.content, "answer");
    }

    #[test]
    fn empty_think_block_yields_empty_thinking() {
        let mut x = ThinkTagExtractor::new();
        let split = x.push("<think></think>ok");
        assert!(split.closed);
        assert_eq!(split.thinking.as_deref(), Some(""));
        assert_eq!(split.content, "ok");
    }
}
