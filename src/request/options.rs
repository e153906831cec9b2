//! Decode options carried by a request.
//!
//! Only fields in [`DecodeOptions`] influence the decoded output, so only they
//! contribute to the [`RequestKey`](super::RequestKey).

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Precision / Scale
// =============================================================================

/// How strictly the decoded size must match the requested [`Resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// Output is exactly `width x height`, cropping per [`Scale`]
    #[default]
    Exactly,
    /// Output has the target aspect ratio and is no larger than the target
    SameAspectRatio,
    /// Output keeps the source aspect ratio and has at most the target pixel
    /// count (10% tolerance)
    LessPixels,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Exactly => "EXACTLY",
            Precision::SameAspectRatio => "SAME_ASPECT_RATIO",
            Precision::LessPixels => "LESS_PIXELS",
        }
    }

    /// Parse the forms accepted on the command line and in query strings.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "exactly" => Some(Precision::Exactly),
            "same_aspect_ratio" => Some(Precision::SameAspectRatio),
            "less_pixels" => Some(Precision::LessPixels),
            _ => None,
        }
    }
}

/// Which part of the source survives when cropping to the target aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    StartCrop,
    #[default]
    CenterCrop,
    EndCrop,
    /// Stretch without cropping
    Fill,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::StartCrop => "START_CROP",
            Scale::CenterCrop => "CENTER_CROP",
            Scale::EndCrop => "END_CROP",
            Scale::Fill => "FILL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "start_crop" | "start" => Some(Scale::StartCrop),
            "center_crop" | "center" => Some(Scale::CenterCrop),
            "end_crop" | "end" => Some(Scale::EndCrop),
            "fill" => Some(Scale::Fill),
            _ => None,
        }
    }
}

// =============================================================================
// Resize
// =============================================================================

/// Target size of the decoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub precision: Precision,
    pub scale: Scale,
}

impl Resize {
    /// Exact resize with center crop.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            precision: Precision::default(),
            scale: Scale::default(),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    /// Stable text used in cache keys, e.g. `Resize(100x80,EXACTLY,CENTER_CROP)`.
    pub fn key(&self) -> String {
        format!(
            "Resize({}x{},{},{})",
            self.width,
            self.height,
            self.precision.as_str(),
            self.scale.as_str()
        )
    }
}

impl fmt::Display for Resize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// =============================================================================
// Region / Color
// =============================================================================

/// Region of interest in source pixel coordinates (after orientation correction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn key(&self) -> String {
        format!(
            "Region({},{},{}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Pixel layout of the decoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorConfig {
    /// Whatever layout the codec produces
    #[default]
    Default,
    Rgba8,
    Rgb8,
    Luma8,
}

impl ColorConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorConfig::Default => "DEFAULT",
            ColorConfig::Rgba8 => "RGBA_8888",
            ColorConfig::Rgb8 => "RGB_888",
            ColorConfig::Luma8 => "LUMA_8",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Some(ColorConfig::Default),
            "rgba8" | "rgba_8888" => Some(ColorConfig::Rgba8),
            "rgb8" | "rgb_888" => Some(ColorConfig::Rgb8),
            "luma8" | "luma_8" | "gray" => Some(ColorConfig::Luma8),
            _ => None,
        }
    }
}

// =============================================================================
// DecodeOptions
// =============================================================================

/// Everything about a request that changes the decoded pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecodeOptions {
    pub resize: Option<Resize>,
    pub region: Option<Region>,
    pub color: ColorConfig,
    pub ignore_exif_orientation: bool,
}

impl DecodeOptions {
    /// Key parameters in a fixed order. Defaults are omitted.
    pub(crate) fn key_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(resize) = &self.resize {
            params.push(("_resize", resize.key()));
        }
        if let Some(region) = &self.region {
            params.push(("_region", region.key()));
        }
        if self.color != ColorConfig::Default {
            params.push(("_color", self.color.as_str().to_string()));
        }
        if self.ignore_exif_orientation {
            params.push(("_ignoreExifOrientation", "true".to_string()));
        }
        params
    }
}
