#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod auth;
pub mod constants;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod store;
pub mod str_utils;
pub mod stream_parser;
pub mod think_tag;
pub mod title;
pub mod transport;
pub mod types;
pub mod wire;

pub use types::*;

pub use orchestrator::{FanOutOrchestrator, OrchestratorConfig};
pub use providers::{ModelConfig, ProviderAdapter};
pub use session::{ModelStreamSession, SessionState, StreamPolicy};
pub use store::{ConversationStore, Response, ResponsePatch, StoreEvent};
