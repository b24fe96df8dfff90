//! HTTP exchange with the vision endpoint and response classification.
//!
//! This is the only stage with network I/O and the only `await` point of the
//! pipeline. It never returns an error: every outcome, including unparsable
//! bodies, becomes a [`ClassifiedResult`].
//!
//! ## Classification rules
//!
//! | HTTP   | Body                          | Result                       |
//! |--------|-------------------------------|------------------------------|
//! | 2xx    | non-empty `choices`           | `Success` (content trimmed)  |
//! | 2xx    | `error` object                | `ApiError`                   |
//! | 2xx    | neither                       | `ParseError`                 |
//! | 2xx    | not JSON                      | `ParseError`                 |
//! | non-2xx| `error` object                | `ApiError` with status       |
//! | non-2xx| anything else                 | `TransportError`             |
//! | none   | connect error / timeout       | `TransportError` (no status) |
//!
//! On non-2xx the error-object parse is best-effort. A failed parse falls
//! back to `TransportError` with the raw body.
//!
//! One call, one POST. No retry.

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::output::{ClassifiedResult, ErrorDetail};
use crate::pipeline::request::ChatRequest;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Response model ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Some gateways send `"error": "text"` instead of an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Detail(ErrorDetail),
    Message(String),
}

impl From<ErrorField> for ErrorDetail {
    fn from(field: ErrorField) -> Self {
        match field {
            ErrorField::Detail(detail) => detail,
            ErrorField::Message(message) => ErrorDetail {
                message,
                kind: None,
                param: None,
                code: None,
            },
        }
    }
}

/// Read an `error` value leniently. Shapes that match neither form are `None`.
fn error_detail(value: Value) -> Option<ErrorDetail> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value::<ErrorField>(value).ok().map(Into::into)
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl Usage {
    /// Read a `usage` value leniently; it never affects classification.
    fn from_value(value: &Value) -> Option<Self> {
        let usage = Usage {
            prompt_tokens: value.get("prompt_tokens").and_then(Value::as_u64),
            completion_tokens: value.get("completion_tokens").and_then(Value::as_u64),
        };
        (usage != Usage::default()).then_some(usage)
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// Classify a fully buffered HTTP response.
///
/// Pure function; usable by hosts that run their own HTTP stack.
pub fn classify_response(status: u16, body: &str) -> ClassifiedResult {
    classify(status, body).0
}

fn classify(status: u16, body: &str) -> (ClassifiedResult, Option<Usage>) {
    if (200..300).contains(&status) {
        classify_success(status, body)
    } else {
        (classify_failure(status, body), None)
    }
}

fn classify_success(status: u16, body: &str) -> (ClassifiedResult, Option<Usage>) {
    let parsed: ChatResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            return (
                ClassifiedResult::ParseError {
                    body: body.to_string(),
                    cause: e.to_string(),
                },
                None,
            )
        }
    };

    let usage = parsed.usage.as_ref().and_then(Usage::from_value);
    let error = parsed.error.and_then(error_detail);
    let result = match (parsed.choices.unwrap_or_default().into_iter().next(), error) {
        (Some(choice), _) => match choice.message {
            // A null or missing `content` is an empty answer, not a parse failure.
            Some(message) => ClassifiedResult::Success {
                text: message.content.unwrap_or_default().trim().to_string(),
                finish_reason: choice.finish_reason,
            },
            None => ClassifiedResult::ParseError {
                body: body.to_string(),
                cause: "first choice has no message".into(),
            },
        },
        (None, Some(detail)) => ClassifiedResult::ApiError {
            detail,
            status: Some(status),
        },
        (None, None) => ClassifiedResult::ParseError {
            body: body.to_string(),
            cause: "unrecognized shape".into(),
        },
    };
    (result, usage)
}

fn classify_failure(status: u16, body: &str) -> ClassifiedResult {
    // Only the `error` key is inspected; other fields cannot sink the parse.
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|mut v| v.get_mut("error").map(Value::take))
        .and_then(error_detail);
    match detail {
        Some(detail) => ClassifiedResult::ApiError {
            detail,
            status: Some(status),
        },
        None => ClassifiedResult::TransportError {
            status: Some(status),
            body: body.to_string(),
        },
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Everything learned from one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub result: ClassifiedResult,
    pub usage: Option<Usage>,
    pub request_bytes: usize,
}

/// Sends [`ChatRequest`]s to one endpoint with one credential.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for VisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    pub fn from_config(config: &VisionConfig) -> Result<Self, VisionError> {
        Self::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `request` once and classify the outcome.
    ///
    /// Dropping the returned future cancels the in-flight request.
    pub async fn send(&self, request: &ChatRequest) -> ClassifiedResult {
        self.exchange(request).await.result
    }

    /// Like [`VisionClient::send`], also reporting usage and request size.
    pub async fn exchange(&self, request: &ChatRequest) -> Exchange {
        let payload = match serde_json::to_vec(request) {
            Ok(p) => p,
            Err(e) => {
                return Exchange {
                    result: ClassifiedResult::TransportError {
                        status: None,
                        body: format!("failed to serialise request: {e}"),
                    },
                    usage: None,
                    request_bytes: 0,
                }
            }
        };
        let request_bytes = payload.len();
        info!(
            "POST {} (model={}, {} bytes)",
            self.endpoint, request.model, request_bytes
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
            .body(payload)
            .send()
            .await;

        let (result, usage) = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.text().await {
                    Ok(body) => {
                        debug!("HTTP {} with {} byte body", status, body.len());
                        classify(status, &body)
                    }
                    Err(e) => (
                        ClassifiedResult::TransportError {
                            status: Some(status),
                            body: format!("failed to read response body: {e}"),
                        },
                        None,
                    ),
                }
            }
            Err(e) => {
                let body = if e.is_timeout() {
                    format!("request timed out after {:?}: {e}", self.timeout)
                } else {
                    format!("request failed: {e}")
                };
                (
                    ClassifiedResult::TransportError {
                        status: e.status().map(|s| s.as_u16()),
                        body,
                    },
                    None,
                )
            }
        };

        if result.is_success() {
            info!("Vision call classified as {}", result.label());
        } else {
            warn!("Vision call classified as {}: {}", result.label(), result);
        }

        Exchange {
            result,
            usage,
            request_bytes,
        }
    }
}
