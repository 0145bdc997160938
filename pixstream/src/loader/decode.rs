//! Image decoding with memory-aware downsampling.
//!
//! The [`Decoder`] trait is the seam between the pipeline and the actual
//! codec so tests can inject corrupt or allocation-limited behavior; the
//! production implementation wraps the `image` crate.

use crate::bitmap::Bitmap;
use image::ImageReader;
use std::io::Cursor;
use thiserror::Error;
use tracing::trace;

/// GIF magic sequence: `G` `I` `F`.
const GIF_MAGIC: &[u8; 3] = b"GIF";

/// Decode failures, split by cause.
///
/// `Corrupt` means the bytes do not decode to an image; `MemoryLimit`
/// means the image is structurally fine but exceeded the allocation cap.
/// The pipeline treats the two very differently (eviction vs. retention),
/// so they must never be conflated.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The data is not a decodable image.
    #[error("corrupt image data: {0}")]
    Corrupt(String),

    /// Decoding would exceed the configured allocation limit.
    #[error("decode exceeds memory limit: {0}")]
    MemoryLimit(String),
}

/// Decoding abstraction for dependency injection.
pub trait Decoder: Send + Sync {
    /// Bounds-only probe: report `(width, height)` without a full decode.
    fn probe_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError>;

    /// Fully decode `bytes` into an RGBA8 bitmap, downsampled by
    /// `sample_size` (a power of two; 1 = no downsampling).
    fn decode(&self, bytes: &[u8], sample_size: u32) -> Result<Bitmap, DecodeError>;
}

/// Check the leading bytes for the animated-GIF signature.
pub fn is_gif(bytes: &[u8]) -> bool {
    bytes.len() >= GIF_MAGIC.len() && &bytes[..GIF_MAGIC.len()] == GIF_MAGIC
}

/// Compute the power-of-two downsample factor for a size hint.
///
/// Returns the largest factor that keeps both decoded dimensions at or
/// above the hint, so the caller never receives less detail than asked
/// for. No hint (or a zero hint) means no downsampling.
pub fn compute_sample_size(width: u32, height: u32, hint: Option<(u32, u32)>) -> u32 {
    let Some((max_w, max_h)) = hint else {
        return 1;
    };
    if max_w == 0 || max_h == 0 {
        return 1;
    }

    let mut sample = 1u32;
    while width / (sample * 2) >= max_w && height / (sample * 2) >= max_h {
        sample *= 2;
    }
    sample
}

/// Production decoder backed by the `image` crate.
pub struct ImageCrateDecoder {
    /// Allocation cap for a single decode; `None` disables the cap.
    max_alloc_bytes: Option<u64>,
}

impl ImageCrateDecoder {
    /// Create a decoder with the given allocation cap.
    pub fn new(max_alloc_bytes: Option<u64>) -> Self {
        Self { max_alloc_bytes }
    }

    fn limits(&self) -> image::Limits {
        let mut limits = image::Limits::no_limits();
        limits.max_alloc = self.max_alloc_bytes;
        limits
    }

    fn map_error(err: image::ImageError) -> DecodeError {
        match err {
            image::ImageError::Limits(limit) => DecodeError::MemoryLimit(limit.to_string()),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

impl Default for ImageCrateDecoder {
    fn default() -> Self {
        // 256 MB of decoded pixels; beyond that the environment, not the
        // data, is the limiting factor.
        Self::new(Some(256 * 1024 * 1024))
    }
}

impl Decoder for ImageCrateDecoder {
    fn probe_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

        reader.into_dimensions().map_err(Self::map_error)
    }

    fn decode(&self, bytes: &[u8], sample_size: u32) -> Result<Bitmap, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        reader.limits(self.limits());

        let decoded = reader.decode().map_err(Self::map_error)?;

        let image = if sample_size > 1 {
            let target_w = (decoded.width() / sample_size).max(1);
            let target_h = (decoded.height() / sample_size).max(1);
            trace!(sample_size, target_w, target_h, "downsampling decode");
            decoded.thumbnail_exact(target_w, target_h)
        } else {
            decoded
        };

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Bitmap::from_rgba8(width, height, rgba.into_raw()))
    }
}
