//! Configuration for one describe invocation.
//!
//! Every knob lives in [`VisionConfig`], built via its
//! [`VisionConfigBuilder`]. The library never reads the environment: the
//! credential, endpoint and prompt all arrive through this struct, so hosts
//! decide where they come from (the `img2vlm` binary maps CLI flags and env
//! vars onto it).

use crate::error::VisionError;
use crate::pipeline::encode::ImageFormat;
use crate::pipeline::request::ImageDetail;
use crate::progress::VisionProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Default OpenAI-compatible chat completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Configuration for a describe call.
///
/// # Example
/// ```rust
/// use edgequake_vision::{ImageFormat, VisionConfig};
///
/// let config = VisionConfig::builder()
///     .api_key("sk-test")
///     .model("gpt-4.1-mini")
///     .max_tokens(500)
///     .image_format(ImageFormat::lossy(85))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct VisionConfig {
    /// Chat completions URL. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Bearer credential sent in the `Authorization` header.
    pub api_key: String,

    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Instruction sent with the image. If None or blank, uses
    /// [`crate::prompts::DEFAULT_PROMPT`].
    pub prompt: Option<String>,

    /// Maximum tokens the model may generate. Must be ≥ 1. Default: 300.
    ///
    /// A one-paragraph description rarely exceeds 200 tokens; the cap keeps
    /// cost predictable if the model starts rambling.
    pub max_tokens: u32,

    /// Sampling temperature (0.0–2.0). If None, the provider default applies
    /// and the field is omitted from the request.
    pub temperature: Option<f32>,

    /// Container used to ship the image. Default: lossless PNG.
    pub image_format: ImageFormat,

    /// Optional `detail` hint for the image part.
    pub detail: Option<ImageDetail>,

    /// Timeout for the whole HTTP exchange, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Optional stage-level progress events.
    pub progress_callback: Option<Arc<dyn VisionProgressCallback>>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            prompt: None,
            max_tokens: 300,
            temperature: None,
            image_format: ImageFormat::default(),
            detail: None,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "api_key",
                &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("model", &self.model)
            .field("prompt", &self.prompt)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("image_format", &self.image_format)
            .field("detail", &self.detail)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn VisionProgressCallback>"),
            )
            .finish()
    }
}

impl VisionConfig {
    /// Create a new builder for `VisionConfig`.
    pub fn builder() -> VisionConfigBuilder {
        VisionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`VisionConfig`].
#[derive(Debug)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn detail(mut self, detail: ImageDetail) -> Self {
        self.config.detail = Some(detail);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn VisionProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<VisionConfig, VisionError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(VisionError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.endpoint.trim().is_empty() {
            return Err(VisionError::InvalidConfig("endpoint must not be empty".into()));
        }
        if c.model.trim().is_empty() {
            return Err(VisionError::InvalidConfig("model must not be empty".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(VisionError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
