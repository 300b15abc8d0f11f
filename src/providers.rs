use crate::constants::CHAT_COMPLETIONS_PATH;
use serde::{Deserialize, Serialize};

/// How a provider exposes intermediate reasoning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStyle {
    /// Reasoning arrives in a dedicated delta field next to the content.
    SeparateField,
    /// Reasoning arrives inline as literal `<think>...</think>` markers.
    InlineThinkTags,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    None,
    Bearer,
}

/// Everything the session needs to know about one hosting endpoint. The
/// streaming control flow is shared; only these few knobs differ per host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderAdapter {
    pub name: String,
    pub endpoint: String,
    pub auth: AuthScheme,
    pub reasoning: ReasoningStyle,
}

impl ProviderAdapter {
    /// Standard OpenAI-compatible host with a bearer key and a separate
    /// reasoning field.
    pub fn openai_compatible(name: impl Into<String>, base_url: &str) -> Self {
        Self {
            name: name.into(),
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CHAT_COMPLETIONS_PATH),
            auth: AuthScheme::Bearer,
            reasoning: ReasoningStyle::SeparateField,
        }
    }

    /// Host whose models emit reasoning inline in `<think>` markers.
    pub fn think_tagged(name: impl Into<String>, base_url: &str) -> Self {
        Self {
            reasoning: ReasoningStyle::InlineThinkTags,
            ..Self::openai_compatible(name, base_url)
        }
    }
}

/// Static descriptor for one selectable model column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Primary model id sent upstream.
    pub id: String,
    /// Substituted after the primary has exhausted its attempts.
    pub fallback_id: Option<String>,
    pub display_name: String,
    pub adapter: ProviderAdapter,
    pub supports_vision: bool,
    pub supports_thinking: bool,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, adapter: ProviderAdapter) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            fallback_id: None,
            adapter,
            supports_vision: false,
            supports_thinking: false,
        }
    }

    pub fn with_fallback(mut self, fallback_id: impl Into<String>) -> Self {
        self.fallback_id = Some(fallback_id.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn with_thinking(mut self) -> Self {
        self.supports_thinking = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_builds_completions_endpoint() {
        let adapter = ProviderAdapter::openai_compatible("standard", "https://api.example.com/");
        assert_eq!(adapter.endpoint, "https://api.example.com/v1/chat/completions");
        assert_eq!(adapter.auth, AuthScheme::Bearer);
        assert_eq!(adapter.reasoning, ReasoningStyle::SeparateField);
    }

    #[test]
    fn think_tagged_adapter_flips_reasoning_style() {
        let adapter = ProviderAdapter::think_tagged("tags", "https://api.example.com");
        assert_eq!(adapter.reasoning, ReasoningStyle::InlineThinkTags);
    }

    #[test]
    fn model_config_builder_round_trip() {
        let adapter = ProviderAdapter::openai_compatible("standard", "https://api.example.com");
        let model = ModelConfig::new("gpt-x", adapter)
            .with_fallback("gpt-x-mini")
            .with_display_name("GPT X")
            .with_vision();
        assert_eq!(model.fallback_id.as_deref(), Some("gpt-x-mini"));
        assert_eq!(model.display_name, "GPT X");
        assert!(model.supports_vision);
        assert!(!model.supports_thinking);
    }
}
