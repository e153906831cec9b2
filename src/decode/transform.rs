//! Post-decode bitmap transformations.
//!
//! Transformations run on the decode pool after resize and color conversion,
//! in the order the request lists them. Each one contributes its
//! [`key`](Transformation::key) to the request key, so the same source with a
//! different chain is a different cache entry.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use tracing::trace;

use super::{Bitmap, DecodeResult};
use crate::cancel::CancelToken;
use crate::error::LoadError;

/// A pure function from one bitmap to another.
pub trait Transformation: Send + Sync {
    /// Stable identity of this transformation and its parameters.
    fn key(&self) -> String;

    /// Produce the transformed image, or `None` when the input is unchanged.
    fn transform(&self, image: &DynamicImage) -> Option<DynamicImage>;
}

/// Rotates clockwise by a multiple of 90 degrees.
///
/// Angles are normalized into `0..360` and snapped to the nearest quarter
/// turn, so `-90`, `270` and `280` all rotate by 270 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateTransformation {
    degrees: u16,
}

impl RotateTransformation {
    pub fn new(degrees: i32) -> Self {
        let normalized = degrees.rem_euclid(360);
        let quarter_turns = ((normalized + 45) / 90) % 4;
        Self {
            degrees: (quarter_turns * 90) as u16,
        }
    }

    /// Effective clockwise rotation: 0, 90, 180 or 270.
    pub fn degrees(&self) -> u16 {
        self.degrees
    }
}

impl Transformation for RotateTransformation {
    fn key(&self) -> String {
        format!("Rotate({})", self.degrees)
    }

    fn transform(&self, image: &DynamicImage) -> Option<DynamicImage> {
        match self.degrees {
            90 => Some(image.rotate90()),
            180 => Some(image.rotate180()),
            270 => Some(image.rotate270()),
            _ => None,
        }
    }
}

impl fmt::Debug for dyn Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Run `transformations` over a decoded result, recording each one that
/// changed the bitmap.
pub fn apply_transformations(
    mut result: DecodeResult,
    transformations: &[Arc<dyn Transformation>],
    cancel: &CancelToken,
) -> Result<DecodeResult, LoadError> {
    for transformation in transformations {
        cancel.checkpoint()?;
        let Some(image) = transformation.transform(result.bitmap.image()) else {
            trace!(transformation = %transformation.key(), "Transformation left image unchanged");
            continue;
        };
        result.bitmap = Arc::new(Bitmap::new(image));
        result.transformations.push(transformation.key());
    }
    Ok(result)
}
