//! Prompts sent alongside the image.
//!
//! Callers override the default via [`crate::config::VisionConfig::prompt`];
//! the constant here is used only when no override is given or the override
//! is blank.

/// Instruction used when the configured prompt is missing or whitespace-only.
pub const DEFAULT_PROMPT: &str = "What is in this image? Describe it in one short paragraph.";
