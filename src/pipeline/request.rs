//! Chat-completion request model and builder.
//!
//! Internally a content part is a true sum type ([`ContentPart`]); the
//! provider's wire format flattens it into a single object keyed by `type`.
//! The flattening happens only in the `Serialize` impl, and it *omits* the
//! field belonging to the other kind instead of writing `null`: strict
//! OpenAI-compatible servers reject `"image_url": null` on a text part.

use crate::error::VisionError;
use crate::pipeline::encode::TransportText;
use crate::prompts::DEFAULT_PROMPT;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// How much image detail the model should use.
///
/// `high` lets GPT-4-class models tile the image at full resolution; `low`
/// forces a single downscaled overview tile. Omitted when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

/// One fragment of a multimodal message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    ImageUrl(ImageUrl),
}

/// Flattened provider shape of a [`ContentPart`].
#[derive(Serialize)]
struct WireContentPart<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a ImageUrl>,
}

impl<'a> From<&'a ContentPart> for WireContentPart<'a> {
    fn from(part: &'a ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WireContentPart {
                kind: "text",
                text: Some(text),
                image_url: None,
            },
            ContentPart::ImageUrl(url) => WireContentPart {
                kind: "image_url",
                text: None,
                image_url: Some(url),
            },
        }
    }
}

impl Serialize for ContentPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireContentPart::from(self).serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

/// A single-shot chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Set the `detail` hint on every image part.
    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        for part in self.messages.iter_mut().flat_map(|m| m.content.iter_mut()) {
            if let ContentPart::ImageUrl(url) = part {
                url.detail = Some(detail);
            }
        }
        self
    }

    /// Sampling temperature, clamped to `0.0..=2.0`.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }
}

/// Build the one-message vision request: prompt text, then the image.
///
/// A blank prompt is replaced by [`DEFAULT_PROMPT`]. `max_tokens` must be
/// positive.
pub fn build_request(
    prompt: &str,
    image: &TransportText,
    max_tokens: u32,
    model: &str,
) -> Result<ChatRequest, VisionError> {
    if max_tokens == 0 {
        return Err(VisionError::InvalidConfig(
            "max_tokens must be a positive integer".into(),
        ));
    }
    if model.trim().is_empty() {
        return Err(VisionError::InvalidConfig("model must not be empty".into()));
    }

    let prompt = if prompt.trim().is_empty() {
        debug!("Blank prompt, using default");
        DEFAULT_PROMPT
    } else {
        prompt
    };

    Ok(ChatRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: vec![
                ContentPart::Text(prompt.to_string()),
                ContentPart::ImageUrl(ImageUrl {
                    url: image.data_uri(),
                    detail: None,
                }),
            ],
        }],
        max_tokens,
        temperature: None,
    })
}
