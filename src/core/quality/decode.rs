//! Image decoding with a JPEG fast path.
//!
//! JPEGs go through zune-jpeg in strict mode, after a structural check that
//! the entropy-coded data is terminated by an end-of-image marker. zune-jpeg
//! would otherwise pad a truncated scan and report success. Everything else
//! goes through the `image` crate.

use crate::error::QualityError;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use std::fs;
use std::path::Path;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

fn is_jpeg(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg")
    )
}

/// Decoder that picks the fastest available path per format
pub struct FastDecoder;

impl FastDecoder {
    pub fn decode(path: &Path) -> Result<DynamicImage, QualityError> {
        let image = if is_jpeg(path) {
            Self::decode_jpeg(path)?
        } else {
            Self::decode_fallback(path)?
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(QualityError::EmptyImage {
                path: path.to_path_buf(),
            });
        }
        Ok(image)
    }

    fn decode_jpeg(path: &Path) -> Result<DynamicImage, QualityError> {
        let bytes = fs::read(path).map_err(|e| QualityError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        if !has_end_of_image(&bytes) {
            return Err(decode_error(path, "truncated JPEG: no end-of-image marker after the last scan"));
        }

        let options = DecoderOptions::new_fast()
            .set_strict_mode(true)
            .jpeg_set_out_colorspace(ColorSpace::RGB);
        let mut decoder = JpegDecoder::new_with_options(&bytes, options);

        let pixels = decoder.decode().map_err(|e| decode_error(path, format!("{:?}", e)))?;
        let info = decoder
            .info()
            .ok_or_else(|| decode_error(path, "missing image info"))?;
        let (width, height) = (info.width as u32, info.height as u32);

        match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
            ColorSpace::RGB => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| decode_error(path, "RGB buffer size mismatch")),
            ColorSpace::RGBA => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| decode_error(path, "RGBA buffer size mismatch")),
            ColorSpace::Luma => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| decode_error(path, "Luma buffer size mismatch")),
            other => Err(decode_error(path, format!("unsupported colorspace {:?}", other))),
        }
    }

    fn decode_fallback(path: &Path) -> Result<DynamicImage, QualityError> {
        image::open(path).map_err(|e| match e {
            image::ImageError::IoError(source) if source.kind() != std::io::ErrorKind::UnexpectedEof => {
                QualityError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
            other => decode_error(path, other.to_string()),
        })
    }
}

/// Whether an EOI marker (`FF D9`) follows the last start-of-scan (`FF DA`).
///
/// Entropy-coded data never contains either marker, so a file cut inside a
/// scan has no EOI after it. An EOI belonging to an embedded thumbnail sits
/// before the main scan and does not count.
fn has_end_of_image(bytes: &[u8]) -> bool {
    let last_marker = |code: u8| bytes.windows(2).rposition(|w| w == [0xFF, code]);
    match (last_marker(0xDA), last_marker(0xD9)) {
        (Some(scan), Some(end)) => end > scan,
        _ => false,
    }
}

fn decode_error(path: &Path, reason: impl Into<String>) -> QualityError {
    QualityError::Decode {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    #[test]
    fn jpeg_detection_ignores_case() {
        assert!(is_jpeg(Path::new("a.JPG")));
        assert!(is_jpeg(Path::new("a.jpeg")));
        assert!(!is_jpeg(Path::new("a.png")));
    }

    #[test]
    fn decodes_jpeg_and_png() {
        let dir = TempDir::new().unwrap();
        let image = RgbImage::from_fn(32, 16, |x, y| Rgb([x as u8 * 8, y as u8 * 16, 0]));
        let jpeg = dir.path().join("a.jpg");
        let png = dir.path().join("a.png");
        image.save(&jpeg).unwrap();
        image.save(&png).unwrap();

        for path in [jpeg, png] {
            let decoded = FastDecoder::decode(&path).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 16));
        }
    }

    #[test]
    fn truncated_jpeg_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.jpg");
        let image = RgbImage::from_fn(256, 192, |x, y| Rgb([(x ^ y) as u8, x as u8, y as u8]));
        image.save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            FastDecoder::decode(&path),
            Err(QualityError::Decode { .. })
        ));
    }

    #[test]
    fn end_of_image_must_follow_the_last_scan() {
        assert!(has_end_of_image(&[0xFF, 0xD8, 0xFF, 0xDA, 0x12, 0x34, 0xFF, 0xD9]));
        // Thumbnail EOI before the main scan
        assert!(!has_end_of_image(&[0xFF, 0xD8, 0xFF, 0xD9, 0xFF, 0xDA, 0x12, 0x34]));
        assert!(!has_end_of_image(&[0xFF, 0xD8, 0x00]));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        assert!(matches!(
            FastDecoder::decode(&path),
            Err(QualityError::Decode { .. })
        ));
    }
}
