//! Image encoding: `PixelBuffer` → compressed container → base64 transport text.
//!
//! VLM APIs (OpenAI and compatibles) accept images as base64 data-URIs
//! embedded in the JSON request body. Two containers are offered:
//!
//! * **PNG** (lossless): byte-exact pixels. The default.
//! * **JPEG** (lossy): smaller payloads for photographic content, with a
//!   quality knob in `1..=100`. Out-of-range values are clamped, never
//!   rejected.

use crate::error::VisionError;
use crate::pipeline::readback::PixelBuffer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lowest JPEG quality accepted by the encoder.
pub const MIN_QUALITY: u8 = 1;
/// Highest JPEG quality accepted by the encoder.
pub const MAX_QUALITY: u8 = 100;

/// Requested output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    /// JPEG at the given quality (clamped to `1..=100` at encode time).
    Lossy { quality: u8 },
    /// PNG. (default)
    #[default]
    Lossless,
}

impl ImageFormat {
    /// JPEG format with `quality` already clamped.
    pub fn lossy(quality: u8) -> Self {
        ImageFormat::Lossy {
            quality: quality.clamp(MIN_QUALITY, MAX_QUALITY),
        }
    }
}

/// Container of an [`EncodedImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Jpeg { quality: u8 },
    Png,
}

impl Container {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Container::Jpeg { .. } => "image/jpeg",
            Container::Png => "image/png",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Container::Jpeg { .. } => "jpeg",
            Container::Png => "png",
        }
    }
}

/// Compressed image bytes. Immutable once produced.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    container: Container,
}

impl EncodedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("container", &self.container)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Base64 (standard alphabet, padded) rendering of an [`EncodedImage`].
#[derive(Clone, PartialEq, Eq)]
pub struct TransportText {
    text: String,
    mime_type: &'static str,
}

impl TransportText {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Decode back to the exact encoded bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.text)
    }

    /// `data:<mime>;base64,<text>` URI for embedding in a request.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.text)
    }
}

impl fmt::Debug for TransportText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportText")
            .field("mime_type", &self.mime_type)
            .field("chars", &self.text.len())
            .finish()
    }
}

/// Compress `buffer` into the requested container.
pub fn encode(buffer: &PixelBuffer, format: ImageFormat) -> Result<EncodedImage, VisionError> {
    let (width, height) = (buffer.width(), buffer.height());
    let mut bytes = Vec::new();

    let container = match format {
        ImageFormat::Lossless => {
            PngEncoder::new(&mut bytes)
                .write_image(buffer.as_bytes(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| encoding_failure(Container::Png, e))?;
            Container::Png
        }
        ImageFormat::Lossy { quality } => {
            let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
            let container = Container::Jpeg { quality };
            // JPEG has no alpha channel.
            let rgb: Vec<u8> = buffer
                .as_bytes()
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut bytes, quality)
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| encoding_failure(container, e))?;
            container
        }
    };

    if bytes.is_empty() {
        return Err(VisionError::EncodingFailure {
            format: container.name(),
            detail: "codec produced no output".into(),
        });
    }

    debug!(
        "Encoded {}x{} px → {} bytes {}",
        width,
        height,
        bytes.len(),
        container.name()
    );
    Ok(EncodedImage { bytes, container })
}

/// Render `image` as base64 transport text.
pub fn to_transport_text(image: &EncodedImage) -> TransportText {
    let text = STANDARD.encode(&image.bytes);
    debug!("Encoded image → {} bytes base64", text.len());
    TransportText {
        text,
        mime_type: image.container.mime_type(),
    }
}

fn encoding_failure(container: Container, e: image::ImageError) -> VisionError {
    VisionError::EncodingFailure {
        format: container.name(),
        detail: e.to_string(),
    }
}
