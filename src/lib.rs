//! # edgequake-vision
//!
//! Describe an image with a Vision Language Model (VLM) in one call.
//!
//! ## Why this crate?
//!
//! Images handed over by a graphics host are often not CPU-readable:
//! compressed, GPU-only, or flagged read-protected. Getting from such a
//! surface to an answer from an OpenAI-compatible vision endpoint involves
//! a readback that must always give its temporary render target back, an
//! encoding step, a request shape that strict servers accept, and a response
//! that may be a success, a structured error, or neither. This crate does
//! all of that and hands back one classified result.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Surface
//!  │
//!  ├─ 1. Readback  rasterise into a scoped render target, copy pixels (spawn_blocking)
//!  ├─ 2. Encode    PNG (lossless) or JPEG (quality 1–100) → base64
//!  ├─ 3. Request   one user message: prompt text + data-URI image part
//!  └─ 4. Transport single POST, response classified into ClassifiedResult
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_vision::{describe_image, RasterSurface, VisionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bytes = std::fs::read("photo.png")?;
//!     let config = VisionConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .build()?;
//!     let output = describe_image(RasterSurface::from_encoded(bytes)?, &config).await?;
//!     println!("{}", output.result);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2vlm` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-vision = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod describe;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{VisionConfig, VisionConfigBuilder, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use describe::{describe, describe_image, describe_sync};
pub use error::VisionError;
pub use output::{ClassifiedResult, DescribeOutput, DescribeStats, ErrorDetail};
pub use pipeline::encode::{encode, to_transport_text, EncodedImage, ImageFormat, TransportText};
pub use pipeline::readback::{
    read_surface, read_surface_async, CpuBackend, PixelBuffer, RasterSurface, RenderBackend,
    Surface, TargetId,
};
pub use pipeline::request::{build_request, ChatRequest, ContentPart, ImageDetail, Role};
pub use pipeline::transport::{classify_response, VisionClient};
pub use progress::{NoopProgressCallback, ProgressCallback, Stage, VisionProgressCallback};
