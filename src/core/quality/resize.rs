//! SIMD grayscale reduction for sharpness analysis.

use crate::error::QualityError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GrayImage};
use std::path::Path;

/// Reduces decoded images to a bounded grayscale working copy
pub struct GrayReducer {
    resizer: Resizer,
    max_edge: u32,
}

impl GrayReducer {
    pub fn new(max_edge: u32) -> Self {
        Self {
            resizer: Resizer::new(),
            max_edge: max_edge.max(1),
        }
    }

    /// Target dimensions: longest edge at most `max_edge`, aspect kept,
    /// never upscaled
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let longest = width.max(height);
        if longest <= self.max_edge {
            return (width, height);
        }
        let scale = self.max_edge as f64 / longest as f64;
        (
            ((width as f64 * scale).round() as u32).max(1),
            ((height as f64 * scale).round() as u32).max(1),
        )
    }

    pub fn reduce(&mut self, image: &DynamicImage, path: &Path) -> Result<GrayImage, QualityError> {
        let gray = image.to_luma8();
        let (src_width, src_height) = gray.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(QualityError::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        let (width, height) = self.target_size(src_width, src_height);
        if (width, height) == (src_width, src_height) {
            return Ok(gray);
        }

        let resize_error = |reason: String| QualityError::Resize {
            path: path.to_path_buf(),
            reason,
        };

        let source = Image::from_vec_u8(src_width, src_height, gray.into_raw(), PixelType::U8)
            .map_err(|e| resize_error(e.to_string()))?;
        let mut target = Image::new(width, height, PixelType::U8);

        let options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        self.resizer
            .resize(&source, &mut target, &options)
            .map_err(|e| resize_error(e.to_string()))?;

        GrayImage::from_raw(width, height, target.into_vec())
            .ok_or_else(|| resize_error("buffer size mismatch".to_string()))
    }
}
