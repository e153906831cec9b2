//! Decoders turn bytes into bitmap artifacts.
//!
//! A [`DecoderFactory`] inspects the sniffed signature (and the mime type the
//! fetcher reported) and returns a [`Decoder`] for that codec. Decoding is
//! CPU-bound and synchronous; the pipeline runs it on the blocking pool under
//! the decode concurrency limit.
//!
//! The bundled [`RasterDecoder`] covers every format the `image` crate is
//! built with and applies, in order: EXIF orientation, region crop, power-of-two
//! sampling, resize per [`Precision`](crate::request::Precision), and color
//! conversion. The request's [`Transformation`] chain runs after that, on the
//! same blocking task.

mod orientation;
mod raster;
mod sampling;
mod transform;

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{ColorType, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::fetch::DataFrom;
use crate::request::{DecodeOptions, ImageRequest};

pub use orientation::{exif_orientation, orientation_from_exif};
pub use raster::{RasterDecoder, RasterDecoderFactory};
pub use sampling::{calculate_sample_size, resize_mapping, ResizeMapping};
pub use transform::{apply_transformations, RotateTransformation, Transformation};

// =============================================================================
// Bitmap
// =============================================================================

/// A decoded, renderable image.
///
/// Shared as `Arc<Bitmap>`; the memory cache and every consumer hold clones of
/// the same allocation.
pub struct Bitmap {
    image: DynamicImage,
}

impl Bitmap {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn color_type(&self) -> ColorType {
        self.image.color()
    }

    /// Size of the pixel buffer in bytes; used as the memory cache weight.
    pub fn byte_count(&self) -> usize {
        self.image.as_bytes().len()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Encode as PNG (lossless), used for the result cache and the HTTP API.
    pub fn encode_png(&self) -> Result<Vec<u8>, LoadError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| LoadError::Internal(format!("PNG encode failed: {e}")))?;
        Ok(buffer.into_inner())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.color_type())
            .finish()
    }
}

// =============================================================================
// ImageInfo / DecodeResult
// =============================================================================

/// Properties of the source image, before any transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// EXIF orientation tag (1 = normal)
    pub exif_orientation: u8,
}

/// Output of a decoder.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub bitmap: Arc<Bitmap>,
    pub image_info: ImageInfo,
    pub data_from: DataFrom,
    /// Power-of-two sampling factor applied (1 = none)
    pub sample_size: u32,
    /// Transformations applied after decoding, in order
    pub transformations: Vec<String>,
    /// Size of the encoded input in bytes
    pub source_size: u64,
}

impl DecodeResult {
    /// Whether the bitmap differs from a plain decode of the source.
    pub fn is_transformed(&self) -> bool {
        !self.transformations.is_empty()
    }
}

/// Encoded bytes plus what the fetcher knows about them.
#[derive(Debug, Clone)]
pub struct DecodeInput {
    pub bytes: Bytes,
    pub mime_type: Option<String>,
    pub data_from: DataFrom,
}

// =============================================================================
// Traits
// =============================================================================

/// Decodes one codec.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode `input` shaped by `options`. Polls `cancel` between stages.
    fn decode(
        &self,
        input: DecodeInput,
        options: &DecodeOptions,
        cancel: &CancelToken,
    ) -> Result<DecodeResult, LoadError>;
}

/// Creates a [`Decoder`] for content it recognizes.
pub trait DecoderFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// `header` holds the first bytes of the content.
    fn create(
        &self,
        request: &ImageRequest,
        header: &[u8],
        mime_type: Option<&str>,
    ) -> Option<Arc<dyn Decoder>>;
}
