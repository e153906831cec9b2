use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader};
use tracing::trace;

use super::orientation::{exif_orientation, swaps_dimensions};
use super::sampling::{calculate_sample_size, resize_mapping};
use super::{Bitmap, DecodeInput, DecodeResult, Decoder, DecoderFactory, ImageInfo};
use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::request::{ColorConfig, DecodeOptions, ImageRequest, Precision, Region};

fn map_image_error(err: ImageError) -> LoadError {
    match err {
        ImageError::Unsupported(e) => LoadError::DecodeUnsupported(e.to_string()),
        ImageError::Limits(e) => LoadError::DecodeUnsupported(e.to_string()),
        other => LoadError::DecodeMalformed(other.to_string()),
    }
}

/// Decoder for every raster format compiled into the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct RasterDecoder {
    format: ImageFormat,
}

impl RasterDecoder {
    pub fn new(format: ImageFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    fn crop_region(image: DynamicImage, region: &Region) -> Result<DynamicImage, LoadError> {
        let (width, height) = (image.width(), image.height());
        if region.width == 0 || region.height == 0 || region.x >= width || region.y >= height {
            return Err(LoadError::InvalidRequest(format!(
                "{} lies outside a {}x{} image",
                region.key(),
                width,
                height
            )));
        }
        let w = region.width.min(width - region.x);
        let h = region.height.min(height - region.y);
        Ok(image.crop_imm(region.x, region.y, w, h))
    }

    fn convert_color(image: DynamicImage, color: ColorConfig) -> DynamicImage {
        match color {
            ColorConfig::Default => image,
            ColorConfig::Rgba8 => match image {
                DynamicImage::ImageRgba8(_) => image,
                other => DynamicImage::ImageRgba8(other.to_rgba8()),
            },
            ColorConfig::Rgb8 => match image {
                DynamicImage::ImageRgb8(_) => image,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            },
            ColorConfig::Luma8 => match image {
                DynamicImage::ImageLuma8(_) => image,
                other => DynamicImage::ImageLuma8(other.to_luma8()),
            },
        }
    }
}

impl Decoder for RasterDecoder {
    fn name(&self) -> &'static str {
        "RasterDecoder"
    }

    fn decode(
        &self,
        input: DecodeInput,
        options: &DecodeOptions,
        cancel: &CancelToken,
    ) -> Result<DecodeResult, LoadError> {
        cancel.checkpoint()?;

        let reader = ImageReader::with_format(Cursor::new(input.bytes.as_ref()), self.format);
        let mut decoder = reader.into_decoder().map_err(map_image_error)?;
        let (src_width, src_height) = decoder.dimensions();
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut image = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;

        let image_info = ImageInfo {
            width: src_width,
            height: src_height,
            mime_type: self.format.to_mime_type().to_string(),
            exif_orientation: exif_orientation(orientation),
        };
        let mut transformations = Vec::new();

        cancel.checkpoint()?;

        if !options.ignore_exif_orientation && orientation != Orientation::NoTransforms {
            image.apply_orientation(orientation);
            transformations.push(format!(
                "ExifOrientationTransformed({})",
                exif_orientation(orientation)
            ));
            trace!(swapped = swaps_dimensions(orientation), "Applied EXIF orientation");
        }

        if let Some(region) = &options.region {
            image = Self::crop_region(image, region)?;
            transformations.push(format!("RegionTransformed({})", region.key()));
        }

        let mut sample_size = 1;
        if let Some(resize) = &options.resize {
            cancel.checkpoint()?;

            sample_size = calculate_sample_size(image.width(), image.height(), resize);
            if sample_size > 1 {
                let w = image.width().div_ceil(sample_size);
                let h = image.height().div_ceil(sample_size);
                image = image.thumbnail_exact(w, h);
                transformations.push(format!("InSampledTransformed({sample_size})"));
            }

            if resize.precision != Precision::LessPixels {
                let mapping = resize_mapping(image.width(), image.height(), resize);
                if !mapping.is_identity(image.width(), image.height()) {
                    cancel.checkpoint()?;
                    let cropped = image.crop_imm(
                        mapping.src_x,
                        mapping.src_y,
                        mapping.src_width,
                        mapping.src_height,
                    );
                    image = if (cropped.width(), cropped.height())
                        == (mapping.dst_width, mapping.dst_height)
                    {
                        cropped
                    } else {
                        cropped.resize_exact(
                            mapping.dst_width,
                            mapping.dst_height,
                            FilterType::Triangle,
                        )
                    };
                    transformations.push(format!("ResizeTransformed({})", resize.key()));
                }
            }
        }

        if options.color != ColorConfig::Default {
            let before = image.color();
            image = Self::convert_color(image, options.color);
            if image.color() != before {
                transformations.push(format!("ColorTransformed({})", options.color.as_str()));
            }
        }

        Ok(DecodeResult {
            bitmap: Arc::new(Bitmap::new(image)),
            image_info,
            data_from: input.data_from,
            sample_size,
            transformations,
            source_size: input.bytes.len() as u64,
        })
    }
}

/// Claims content whose signature (or, failing that, mime type) is a known
/// raster format.
#[derive(Debug, Default)]
pub struct RasterDecoderFactory;

impl DecoderFactory for RasterDecoderFactory {
    fn name(&self) -> &'static str {
        "RasterDecoder"
    }

    fn create(
        &self,
        _request: &ImageRequest,
        header: &[u8],
        mime_type: Option<&str>,
    ) -> Option<Arc<dyn Decoder>> {
        let format = image::guess_format(header)
            .ok()
            .or_else(|| mime_type.and_then(ImageFormat::from_mime_type))?;
        Some(Arc::new(RasterDecoder::new(format)))
    }
}
