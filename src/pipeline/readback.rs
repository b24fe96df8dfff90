//! Surface readback: copy a possibly non-readable surface into host memory.
//!
//! Sources handed to us by a host are not necessarily CPU-readable: they may
//! be compressed, live only on the GPU, or be flagged read-protected. The
//! only operation every backend can perform is "draw this surface into a
//! render target, then read back the pixels of the active read target".
//! That is the contract captured by [`RenderBackend`].
//!
//! ## Scoped resources
//!
//! Two pieces of backend state are touched during a readback:
//!
//! 1. a temporary render target, acquired for the call and released
//!    exactly once afterwards ([`TemporaryTarget`]);
//! 2. the backend's single *active read target* slot, which must be put back
//!    to whatever it held before ([`ActiveTargetScope`]).
//!
//! Both are RAII guards, so every exit path (`?`, panic unwinding, or the
//! caller abandoning an async task) runs the release logic. The active read
//! target is process-wide state, so readbacks are serialised on
//! [`READ_TARGET_LOCK`].

use crate::error::{BackendError, VisionError};
use image::RgbaImage;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Bytes per pixel of every [`PixelBuffer`] (RGBA, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 4;

/// Serialises access to the active read target slot across all readbacks.
static READ_TARGET_LOCK: Mutex<()> = Mutex::new(());

// ── Pixel buffer ─────────────────────────────────────────────────────────

/// A host-readable RGBA8 pixel grid.
///
/// Invariant: `width > 0`, `height > 0` and
/// `as_bytes().len() == width * height * 4`.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer. `None` for empty or overflowing sizes.
    pub fn zeroed(width: u32, height: u32) -> Option<Self> {
        let len = Self::byte_len(width, height)?;
        Some(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    /// Wrap existing RGBA8 bytes. `None` if the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (Self::byte_len(width, height)? == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    fn byte_len(width: u32, height: u32) -> Option<usize> {
        if width == 0 || height == 0 {
            return None;
        }
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ── Backend contract ─────────────────────────────────────────────────────

/// Opaque handle to a backend render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// Dimensions of a source surface, known without reading its pixels.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// The "draw a surface, read back the active target" capability.
///
/// Implemented by whatever graphics layer the host uses. Methods take
/// `&self`; implementations keep their own interior state.
pub trait RenderBackend: Send + Sync {
    /// Surface type this backend knows how to rasterise.
    type Source: Surface + ?Sized;

    /// Allocate a `width × height` RGBA8 colour target with no depth buffer.
    fn acquire_target(&self, width: u32, height: u32) -> Result<TargetId, BackendError>;

    /// Return a target to the backend. Called exactly once per acquisition.
    fn release_target(&self, target: TargetId);

    /// Target currently used by [`RenderBackend::read_pixels`].
    fn active_read_target(&self) -> Option<TargetId>;

    fn set_active_read_target(&self, target: Option<TargetId>);

    /// Draw `source` into `target`, covering it entirely.
    fn rasterize(&self, source: &Self::Source, target: TargetId) -> Result<(), BackendError>;

    /// Copy the active read target into `out`, whose size matches the target.
    fn read_pixels(&self, out: &mut PixelBuffer) -> Result<(), BackendError>;
}

// ── Scoped guards ────────────────────────────────────────────────────────

/// Releases its render target when dropped.
struct TemporaryTarget<'a, B: RenderBackend + ?Sized> {
    backend: &'a B,
    id: TargetId,
}

impl<'a, B: RenderBackend + ?Sized> TemporaryTarget<'a, B> {
    fn acquire(backend: &'a B, width: u32, height: u32) -> Result<Self, VisionError> {
        let id = backend
            .acquire_target(width, height)
            .map_err(|e| VisionError::readback("acquire render target", e))?;
        Ok(Self { backend, id })
    }
}

impl<B: RenderBackend + ?Sized> Drop for TemporaryTarget<'_, B> {
    fn drop(&mut self) {
        self.backend.release_target(self.id);
    }
}

/// Makes a target active for reading and restores the previous one on drop.
struct ActiveTargetScope<'a, B: RenderBackend + ?Sized> {
    backend: &'a B,
    previous: Option<TargetId>,
}

impl<'a, B: RenderBackend + ?Sized> ActiveTargetScope<'a, B> {
    fn enter(backend: &'a B, target: TargetId) -> Self {
        let previous = backend.active_read_target();
        backend.set_active_read_target(Some(target));
        Self { backend, previous }
    }
}

impl<B: RenderBackend + ?Sized> Drop for ActiveTargetScope<'_, B> {
    fn drop(&mut self) {
        self.backend.set_active_read_target(self.previous);
    }
}

// ── Readback ─────────────────────────────────────────────────────────────

/// Produce a host-readable copy of `source` with the same dimensions.
///
/// The source is never mutated. `None` fails with
/// [`VisionError::SurfaceUnavailable`] before the backend is touched.
pub fn read_surface<B>(backend: &B, source: Option<&B::Source>) -> Result<PixelBuffer, VisionError>
where
    B: RenderBackend + ?Sized,
{
    let source = source.ok_or(VisionError::SurfaceUnavailable)?;
    let (width, height) = (source.width(), source.height());
    if PixelBuffer::byte_len(width, height).is_none() {
        return Err(VisionError::readback(
            "validate source",
            format!("unsupported surface size {width}x{height}"),
        ));
    }

    let _slot = READ_TARGET_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    // Drop order matters: the scope (declared last) restores the previous
    // read target before the temporary target is released.
    let target = TemporaryTarget::acquire(backend, width, height)?;
    backend
        .rasterize(source, target.id)
        .map_err(|e| VisionError::readback("rasterise source", e))?;

    let scope = ActiveTargetScope::enter(backend, target.id);
    let mut buffer = PixelBuffer::zeroed(width, height)
        .ok_or_else(|| VisionError::Internal("pixel buffer size overflow".into()))?;
    backend
        .read_pixels(&mut buffer)
        .map_err(|e| VisionError::readback("copy pixels", e))?;
    drop(scope);
    drop(target);

    debug!("Read back surface → {}x{} px", width, height);
    Ok(buffer)
}

/// Async wrapper around [`read_surface`].
///
/// Readback is blocking work, so it runs inside `spawn_blocking` like any
/// other CPU-bound rasterisation. If the awaiting task is cancelled the
/// blocking closure still runs to completion and its guards still fire.
pub async fn read_surface_async<B>(
    backend: Arc<B>,
    source: Option<Arc<B::Source>>,
) -> Result<PixelBuffer, VisionError>
where
    B: RenderBackend + 'static,
    B::Source: Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || read_surface(backend.as_ref(), source.as_deref()))
        .await
        .map_err(|e| VisionError::Internal(format!("Readback task panicked: {}", e)))?
}

// ── CPU backend ──────────────────────────────────────────────────────────

/// An in-memory source surface for [`CpuBackend`].
#[derive(Clone)]
pub enum RasterSurface {
    /// Already decoded pixels.
    Decoded(RgbaImage),
    /// Container bytes (PNG, JPEG) decoded only when rasterised.
    Compressed {
        bytes: Arc<[u8]>,
        width: u32,
        height: u32,
    },
}

impl RasterSurface {
    /// Wrap encoded image bytes, probing the header for dimensions.
    pub fn from_encoded(bytes: impl Into<Arc<[u8]>>) -> Result<Self, VisionError> {
        let bytes: Arc<[u8]> = bytes.into();
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes[..]))
            .with_guessed_format()
            .map_err(|e| VisionError::readback("probe source", e))?
            .into_dimensions()
            .map_err(|e| VisionError::readback("probe source", e))?;
        Ok(RasterSurface::Compressed {
            bytes,
            width,
            height,
        })
    }
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        match self {
            RasterSurface::Decoded(img) => img.width(),
            RasterSurface::Compressed { width, .. } => *width,
        }
    }

    fn height(&self) -> u32 {
        match self {
            RasterSurface::Decoded(img) => img.height(),
            RasterSurface::Compressed { height, .. } => *height,
        }
    }
}

impl std::fmt::Debug for RasterSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RasterSurface::Decoded(img) => write!(f, "Decoded({}x{})", img.width(), img.height()),
            RasterSurface::Compressed {
                bytes,
                width,
                height,
            } => write!(f, "Compressed({}x{}, {} bytes)", width, height, bytes.len()),
        }
    }
}

#[derive(Default)]
struct CpuState {
    targets: HashMap<TargetId, RgbaImage>,
    pool: Vec<RgbaImage>,
    active: Option<TargetId>,
}

/// Software [`RenderBackend`] over the `image` crate.
///
/// Released targets go back to a small pool and are reused for requests of
/// the same size.
pub struct CpuBackend {
    state: Mutex<CpuState>,
    next_id: AtomicU64,
    max_pooled: usize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(4)
    }
}

impl CpuBackend {
    /// Create a backend keeping at most `max_pooled` released targets.
    pub fn new(max_pooled: usize) -> Self {
        Self {
            state: Mutex::new(CpuState::default()),
            next_id: AtomicU64::new(1),
            max_pooled,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Targets acquired and not yet released.
    pub fn live_targets(&self) -> usize {
        self.state().targets.len()
    }

    pub fn acquired_total(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_total(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Released targets currently held for reuse.
    pub fn pooled_targets(&self) -> usize {
        self.state().pool.len()
    }
}

impl RenderBackend for CpuBackend {
    type Source = RasterSurface;

    fn acquire_target(&self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        let mut state = self.state();
        let image = match state
            .pool
            .iter()
            .position(|img| img.dimensions() == (width, height))
        {
            Some(pos) => state.pool.swap_remove(pos),
            None => RgbaImage::new(width, height),
        };
        let id = TargetId(self.next_id.fetch_add(1, Ordering::SeqCst));
        state.targets.insert(id, image);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn release_target(&self, target: TargetId) {
        let mut state = self.state();
        match state.targets.remove(&target) {
            Some(image) => {
                if state.pool.len() < self.max_pooled {
                    state.pool.push(image);
                }
                self.released.fetch_add(1, Ordering::SeqCst);
            }
            None => warn!("Ignoring release of unknown render target {:?}", target),
        }
    }

    fn active_read_target(&self) -> Option<TargetId> {
        self.state().active
    }

    fn set_active_read_target(&self, target: Option<TargetId>) {
        self.state().active = target;
    }

    fn rasterize(&self, source: &RasterSurface, target: TargetId) -> Result<(), BackendError> {
        let decoded;
        let pixels = match source {
            RasterSurface::Decoded(img) => img,
            RasterSurface::Compressed { bytes, .. } => {
                decoded = image::load_from_memory(&bytes[..])?.to_rgba8();
                &decoded
            }
        };

        let mut state = self.state();
        let dst = state
            .targets
            .get_mut(&target)
            .ok_or_else(|| format!("render target {:?} is not allocated", target))?;
        if dst.dimensions() != pixels.dimensions() {
            return Err(format!(
                "source is {}x{} but target is {}x{}",
                pixels.width(),
                pixels.height(),
                dst.width(),
                dst.height()
            )
            .into());
        }
        dst.copy_from_slice(pixels.as_raw());
        Ok(())
    }

    fn read_pixels(&self, out: &mut PixelBuffer) -> Result<(), BackendError> {
        let state = self.state();
        let active = state.active.ok_or("no active read target")?;
        let src = state
            .targets
            .get(&active)
            .ok_or_else(|| format!("active read target {:?} is not allocated", active))?;
        if src.dimensions() != (out.width(), out.height()) {
            return Err("read target size does not match destination buffer".into());
        }
        out.as_bytes_mut().copy_from_slice(src.as_raw());
        Ok(())
    }
}
