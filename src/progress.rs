//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn VisionProgressCallback>`] via
//! [`crate::config::VisionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its four stages. The CLI uses this to
//! drive a spinner; servers can forward events to metrics or logs.
//!
//! # Example
//!
//! ```rust
//! use edgequake_vision::{Stage, VisionConfig, VisionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl VisionProgressCallback for Printer {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("→ {stage}");
//!     }
//! }
//!
//! let config = VisionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn VisionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ClassifiedResult;
use std::fmt;
use std::sync::Arc;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Readback,
    Encode,
    Request,
    Transport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Readback => "readback",
            Stage::Encode => "encode",
            Stage::Request => "request",
            Stage::Transport => "transport",
        })
    }
}

/// Called by the pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; separate
/// invocations may run concurrently on different tasks.
pub trait VisionProgressCallback: Send + Sync {
    /// Called just before `stage` begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after `stage` produced its output.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a local stage fails and the pipeline aborts.
    fn on_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once with the classified network outcome.
    fn on_result(&self, result: &ClassifiedResult) {
        let _ = result;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl VisionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::VisionConfig`].
pub type ProgressCallback = Arc<dyn VisionProgressCallback>;
