//! Error types for the edgequake-vision library.
//!
//! Two distinct failure surfaces reflect the two halves of the pipeline:
//!
//! * [`VisionError`] (**fatal**): a local stage (readback, encode, request
//!   building) could not produce its output. Returned as `Err(VisionError)`
//!   and aborts the pipeline before anything is sent over the network.
//!
//! * [`crate::output::ClassifiedResult`] (**network boundary**): everything
//!   that happens once the request leaves the process (success, structured
//!   API error, transport failure, unparsable body) is normalised into one
//!   value. The transport stage never returns `Err`.

use thiserror::Error;

/// Boxed cause reported by a [`crate::pipeline::readback::RenderBackend`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All fatal errors returned by the edgequake-vision library.
#[derive(Debug, Error)]
pub enum VisionError {
    // ── Readback errors ───────────────────────────────────────────────────
    /// No source surface was supplied.
    #[error("Surface unavailable: no source image was provided.\nPass a valid surface handle to the reader.")]
    SurfaceUnavailable,

    /// Rasterising the source or copying its pixels failed.
    #[error("Readback failed: {stage}: {source}")]
    ReadbackFailure {
        stage: &'static str,
        #[source]
        source: BackendError,
    },

    // ── Encode errors ─────────────────────────────────────────────────────
    /// The codec failed or produced no bytes.
    #[error("Image encoding failed ({format}): {detail}")]
    EncodingFailure { format: &'static str, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    pub(crate) fn readback(stage: &'static str, source: impl Into<BackendError>) -> Self {
        VisionError::ReadbackFailure {
            stage,
            source: source.into(),
        }
    }
}
