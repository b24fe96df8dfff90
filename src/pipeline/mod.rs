//! Pipeline stages for surface-to-description.
//!
//! Each submodule implements exactly one transformation step. Hosts can plug
//! in their own render backend or HTTP stack at the stage boundaries.
//!
//! ## Data Flow
//!
//! ```text
//! readback ──▶ encode ──▶ request ──▶ transport
//! (surface)    (base64)   (chat JSON)  (classify)
//! ```
//!
//! 1. [`readback`]: rasterise the source into a temporary target and copy
//!    it to a host-readable [`readback::PixelBuffer`]
//! 2. [`encode`]: PNG/JPEG-encode and base64-wrap the pixels
//! 3. [`request`]: build the single user message (prompt + image data URI)
//! 4. [`transport`]: one POST to the endpoint; the only stage with network
//!    I/O and the only one that never fails

pub mod encode;
pub mod readback;
pub mod request;
pub mod transport;
