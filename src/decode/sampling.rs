//! Sample size and resize geometry.

use crate::request::{Precision, Resize, Scale};

/// Pixel budget tolerance for [`Precision::LessPixels`].
const LESS_PIXELS_TOLERANCE: f64 = 1.1;

/// Power-of-two sampling factor for decoding a `width x height` source.
///
/// For `Exactly` and `SameAspectRatio` this is the largest factor that keeps
/// both sampled sides at or above the target, so the final resize only ever
/// scales down. For `LessPixels` it is the smallest factor that brings the
/// pixel count under the target budget.
pub fn calculate_sample_size(width: u32, height: u32, resize: &Resize) -> u32 {
    if resize.width == 0 || resize.height == 0 || width == 0 || height == 0 {
        return 1;
    }

    let sampled = |s: u32| (width.div_ceil(s), height.div_ceil(s));
    let mut sample = 1u32;

    match resize.precision {
        Precision::LessPixels => {
            let budget =
                resize.width as f64 * resize.height as f64 * LESS_PIXELS_TOLERANCE;
            loop {
                let (w, h) = sampled(sample);
                if (w as f64 * h as f64) <= budget || (w <= 1 && h <= 1) {
                    break;
                }
                sample *= 2;
            }
        }
        Precision::Exactly | Precision::SameAspectRatio => loop {
            let (w, h) = sampled(sample * 2);
            if w < resize.width || h < resize.height {
                break;
            }
            sample *= 2;
        },
    }
    sample
}

/// Source crop rectangle and destination size for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeMapping {
    pub src_x: u32,
    pub src_y: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
}

impl ResizeMapping {
    /// Whether applying the mapping would leave the image unchanged.
    pub fn is_identity(&self, width: u32, height: u32) -> bool {
        self.src_x == 0
            && self.src_y == 0
            && self.src_width == width
            && self.src_height == height
            && self.dst_width == width
            && self.dst_height == height
    }
}

/// Map a `width x height` image onto `resize`.
///
/// `LessPixels` is satisfied by sampling alone and maps to the identity.
pub fn resize_mapping(width: u32, height: u32, resize: &Resize) -> ResizeMapping {
    let identity = ResizeMapping {
        src_x: 0,
        src_y: 0,
        src_width: width,
        src_height: height,
        dst_width: width,
        dst_height: height,
    };
    if resize.precision == Precision::LessPixels
        || resize.width == 0
        || resize.height == 0
        || width == 0
        || height == 0
    {
        return identity;
    }

    let (tw, th) = (resize.width as u64, resize.height as u64);
    let (w, h) = (width as u64, height as u64);

    let (crop_w, crop_h) = if resize.scale == Scale::Fill {
        (w, h)
    } else if w * th > h * tw {
        // Source is wider than the target
        (((h * tw + th / 2) / th).clamp(1, w), h)
    } else {
        (w, ((w * th + tw / 2) / tw).clamp(1, h))
    };

    let offset = |total: u64, part: u64| -> u64 {
        match resize.scale {
            Scale::StartCrop | Scale::Fill => 0,
            Scale::CenterCrop => (total - part) / 2,
            Scale::EndCrop => total - part,
        }
    };

    let (dst_w, dst_h) = match resize.precision {
        Precision::SameAspectRatio if crop_w <= tw && crop_h <= th => (crop_w, crop_h),
        _ => (tw, th),
    };

    ResizeMapping {
        src_x: offset(w, crop_w) as u32,
        src_y: offset(h, crop_h) as u32,
        src_width: crop_w as u32,
        src_height: crop_h as u32,
        dst_width: dst_w as u32,
        dst_height: dst_h as u32,
    }
}
