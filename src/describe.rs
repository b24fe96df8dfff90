//! Pipeline entry points: surface in, classified answer out.
//!
//! The stages run strictly in order, each consuming the previous stage's
//! output:
//!
//! ```text
//! readback ──▶ encode ──▶ request ──▶ transport
//! (backend)    (png/jpeg)  (json)      (HTTP POST, one await)
//! ```
//!
//! Local stages fail fast with [`VisionError`]; nothing is sent if any of
//! them fails. Once the request is on the wire every outcome is a
//! [`ClassifiedResult`] inside `Ok(DescribeOutput)`.

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::output::{DescribeOutput, DescribeStats};
use crate::pipeline::readback::{self, CpuBackend, RasterSurface, RenderBackend};
use crate::pipeline::transport::VisionClient;
use crate::pipeline::{encode, request};
use crate::progress::Stage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Read back, encode and describe `surface` through `backend`.
///
/// # Errors
/// Returns `Err(VisionError)` only for local failures:
/// - no surface ([`VisionError::SurfaceUnavailable`])
/// - rasterisation / pixel copy ([`VisionError::ReadbackFailure`])
/// - codec failure ([`VisionError::EncodingFailure`])
/// - invalid request parameters ([`VisionError::InvalidConfig`])
///
/// API rejections, HTTP failures and malformed bodies are reported in
/// [`DescribeOutput::result`].
pub async fn describe<B>(
    backend: Arc<B>,
    surface: Option<Arc<B::Source>>,
    config: &VisionConfig,
) -> Result<DescribeOutput, VisionError>
where
    B: RenderBackend + 'static,
    B::Source: Send + Sync + 'static,
{
    let total_start = Instant::now();
    let mut stats = DescribeStats::default();

    // ── Step 1: Readback ─────────────────────────────────────────────────
    let readback_start = Instant::now();
    let pixels = run_stage(config, Stage::Readback, async {
        readback::read_surface_async(backend, surface).await
    })
    .await?;
    stats.width = pixels.width();
    stats.height = pixels.height();
    stats.readback_duration_ms = readback_start.elapsed().as_millis() as u64;

    // ── Step 2: Encode ───────────────────────────────────────────────────
    let encode_start = Instant::now();
    let transport_text = run_stage(config, Stage::Encode, async {
        let encoded = encode::encode(&pixels, config.image_format)?;
        stats.encoded_bytes = encoded.len();
        Ok(encode::to_transport_text(&encoded))
    })
    .await?;
    // The pixel buffer's job is done; free it before the network wait.
    drop(pixels);
    stats.encode_duration_ms = encode_start.elapsed().as_millis() as u64;

    // ── Step 3: Build request ────────────────────────────────────────────
    let chat_request = run_stage(config, Stage::Request, async {
        let mut req = request::build_request(
            config.prompt.as_deref().unwrap_or_default(),
            &transport_text,
            config.max_tokens,
            &config.model,
        )?;
        if let Some(detail) = config.detail {
            req = req.with_detail(detail);
        }
        if let Some(t) = config.temperature {
            req = req.with_temperature(t);
        }
        Ok(req)
    })
    .await?;
    drop(transport_text);

    // ── Step 4: Transport ────────────────────────────────────────────────
    let client = VisionClient::from_config(config)?;
    notify(config, |cb| cb.on_stage_start(Stage::Transport));
    let api_start = Instant::now();
    let exchange = client.exchange(&chat_request).await;
    stats.api_duration_ms = api_start.elapsed().as_millis() as u64;
    notify(config, |cb| {
        cb.on_stage_complete(Stage::Transport);
        cb.on_result(&exchange.result);
    });

    stats.request_bytes = exchange.request_bytes;
    if let Some(usage) = exchange.usage {
        stats.input_tokens = usage.prompt_tokens;
        stats.output_tokens = usage.completion_tokens;
    }
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Describe finished: {} in {}ms ({}x{} px, {} bytes encoded)",
        exchange.result.label(),
        stats.total_duration_ms,
        stats.width,
        stats.height,
        stats.encoded_bytes
    );

    Ok(DescribeOutput {
        result: exchange.result,
        stats,
    })
}

/// Describe an in-memory image using the software [`CpuBackend`].
pub async fn describe_image(
    surface: RasterSurface,
    config: &VisionConfig,
) -> Result<DescribeOutput, VisionError> {
    describe(Arc::new(CpuBackend::default()), Some(Arc::new(surface)), config).await
}

/// Synchronous wrapper around [`describe_image`].
///
/// Creates a temporary tokio runtime internally.
pub fn describe_sync(
    surface: RasterSurface,
    config: &VisionConfig,
) -> Result<DescribeOutput, VisionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| VisionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(describe_image(surface, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn notify(config: &VisionConfig, f: impl FnOnce(&dyn crate::progress::VisionProgressCallback)) {
    if let Some(ref cb) = config.progress_callback {
        f(cb.as_ref());
    }
}

/// Run one local stage, reporting start / completion / failure.
async fn run_stage<T>(
    config: &VisionConfig,
    stage: Stage,
    fut: impl std::future::Future<Output = Result<T, VisionError>>,
) -> Result<T, VisionError> {
    notify(config, |cb| cb.on_stage_start(stage));
    match fut.await {
        Ok(v) => {
            debug!("Stage {} complete", stage);
            notify(config, |cb| cb.on_stage_complete(stage));
            Ok(v)
        }
        Err(e) => {
            notify(config, |cb| cb.on_error(stage, &e.to_string()));
            Err(e)
        }
    }
}
