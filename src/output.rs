//! Result types returned by the describe pipeline.
//!
//! [`ClassifiedResult`] is the single value produced at the network boundary.
//! It keeps the raw body for every non-success outcome so nothing the server
//! sent is lost, and it keeps an empty-but-parsed answer
//! (`Success { text: "" }`) distinct from a body that could not be parsed.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Structured error object returned by OpenAI-style APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, deserialize_with = "de_message")]
    pub message: String,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_lenient"
    )]
    pub kind: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_lenient"
    )]
    pub param: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_lenient"
    )]
    pub code: Option<String>,
}

/// Providers disagree on whether fields like `code` are strings, numbers or
/// `null`. Non-string scalars are stringified.
fn de_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// `"message": null` reads as an empty message.
fn de_message<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    de_lenient(d).map(Option::unwrap_or_default)
}

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClassifiedResult {
    /// The model answered. `text` is trimmed and may be empty.
    Success {
        text: String,
        finish_reason: Option<String>,
    },
    /// The provider rejected the request with a structured error.
    ApiError {
        detail: ErrorDetail,
        status: Option<u16>,
    },
    /// Network or HTTP failure without a structured error body.
    /// `status` is `None` when no HTTP response was received.
    TransportError { status: Option<u16>, body: String },
    /// The body matched no known response shape.
    ParseError { body: String, cause: String },
}

impl ClassifiedResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ClassifiedResult::Success { .. })
    }

    /// The answer text, if the exchange succeeded.
    pub fn text(&self) -> Option<&str> {
        match self {
            ClassifiedResult::Success { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Short machine-friendly outcome label, used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedResult::Success { .. } => "success",
            ClassifiedResult::ApiError { .. } => "api_error",
            ClassifiedResult::TransportError { .. } => "transport_error",
            ClassifiedResult::ParseError { .. } => "parse_error",
        }
    }
}

impl fmt::Display for ClassifiedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifiedResult::Success {
                text,
                finish_reason,
            } => write!(
                f,
                "success ({}): {}",
                finish_reason.as_deref().unwrap_or("unknown"),
                text
            ),
            ClassifiedResult::ApiError { detail, status } => {
                write!(f, "API error")?;
                if let Some(s) = status {
                    write!(f, " (HTTP {s})")?;
                }
                write!(f, ": {}", detail.message)?;
                if let Some(ref kind) = detail.kind {
                    write!(f, " [type={kind}]")?;
                }
                if let Some(ref code) = detail.code {
                    write!(f, " [code={code}]")?;
                }
                if let Some(ref param) = detail.param {
                    write!(f, " [param={param}]")?;
                }
                Ok(())
            }
            ClassifiedResult::TransportError { status, body } => match status {
                Some(s) => write!(f, "transport error (HTTP {s}): {body}"),
                None => write!(f, "transport error: {body}"),
            },
            ClassifiedResult::ParseError { body, cause } => {
                write!(f, "unparsable response ({cause}): {body}")
            }
        }
    }
}

/// Per-invocation timings and sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeStats {
    pub width: u32,
    pub height: u32,
    pub encoded_bytes: usize,
    pub request_bytes: usize,
    pub readback_duration_ms: u64,
    pub encode_duration_ms: u64,
    pub api_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Token counts when the provider reports `usage`.
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// What [`crate::describe`] returns when every local stage succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeOutput {
    pub result: ClassifiedResult,
    pub stats: DescribeStats,
}
