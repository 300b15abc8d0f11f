use serde::{Deserialize, Serialize};

/// --- OUTGOING CHAT-COMPLETIONS SCHEMA ---
///
/// The subset of the OpenAI-compatible request shape every hosted model in
/// the fan-out accepts: `{model, messages, stream}` plus optional sampling
/// caps. Provider quirks live in the adapter, not here.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn one_shot(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System { content: String },
    User { content: WireContent },
    Assistant { content: String },
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        WireMessage::System {
            content: content.into(),
        }
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        WireMessage::User {
            content: WireContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        WireMessage::Assistant {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
    File { file: WireFile },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFile {
    pub filename: String,
    pub file_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_expected_shape() {
        let req = ChatRequest::streaming(
            "gpt-x",
            vec![
                WireMessage::system("You are helpful."),
                WireMessage::user_text("Explain recursion"),
            ],
        );
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["model"], "gpt-x");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Explain recursion");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn multimodal_user_content_serializes_as_parts() {
        let msg = WireMessage::User {
            content: WireContent::Parts(vec![
                WirePart::Text {
                    text: "what is in this image?".into(),
                },
                WirePart::ImageUrl {
                    image_url: WireImageUrl {
                        url: "data:image/png;base64,AAAA".into(),
                    },
                },
            ]),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
    }
}
