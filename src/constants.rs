/// Watchdog for the first byte of reasoning/content. Disarmed permanently
/// once anything meaningful has arrived.
pub const FIRST_BYTE_TIMEOUT_SECS: u64 = 10;

/// Base delay between attempt tiers (doubled per tier, jittered).
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Title shown while a greeting-only chat waits for a real first topic.
pub const SENTINEL_TITLE: &str = "New Conversation";

pub const TITLE_MAX_CHARS: usize = 48;

/// Conversational openers that should not become a chat title.
pub const GREETING_VOCABULARY: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "sup",
    "hiya",
    "howdy",
    "hola",
    "good morning",
    "good afternoon",
    "good evening",
    "whats up",
    "hey there",
    "hi there",
];

/// Inline reasoning markers used by providers that do not expose a
/// separate reasoning field.
pub const THINK_OPEN_TAG: &str = "<think>";
pub const THINK_CLOSE_TAG: &str = "</think>";

/// Conventional chat-completions path for OpenAI-compatible hosts.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Hard caps against runaway or hostile streams.
pub const MAX_STREAM_LINES: usize = 100_000;
pub const MAX_DATA_LINE_BYTES: usize = 10 * 1024 * 1024;
