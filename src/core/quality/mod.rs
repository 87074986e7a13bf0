//! # Quality Module
//!
//! Sharpness, resolution and a composite score for every hashed file.
//!
//! ## Sharpness
//! Variance of the Laplacian over a grayscale reduction of the image. Flat
//! or out-of-focus images have weak edges and a low variance.
//!
//! ## Flags vs. score
//! `TooSmall` and `Blurry` are categorical flags decided by configurable
//! floors. The composite score only breaks ties inside a group; it never
//! decides a flag.
//!
//! ## Non-images
//! Videos and formats we cannot decode skip sharpness and get a size-only
//! score. Decode failures mark the record `Corrupted`.

mod decode;
mod resize;

pub use decode::FastDecoder;
pub use resize::GrayReducer;

use crate::config::TriageConfig;
use crate::core::metadata::{self, SidecarMetadata};
use crate::core::record::{
    FailureReason, FileRecord, MediaKind, QualityFlag, RecordState, Resolution,
};
use crate::error::QualityError;
use image::GrayImage;
use serde::{Deserialize, Serialize};

const MIB: f64 = 1024.0 * 1024.0;

/// Weights of the composite quality score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    /// Points per MiB of file size
    pub per_mib: f64,
    /// Points per megapixel
    pub per_megapixel: f64,
    /// Points per unit of Laplacian variance
    pub per_sharpness_unit: f64,
    /// Bonus when a metadata sidecar accompanies the file
    pub sidecar_bonus: f64,
    /// Bonus when the image is not flagged blurry
    pub unblurred_bonus: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            per_mib: 1.0,
            per_megapixel: 1.0,
            per_sharpness_unit: 0.01,
            sidecar_bonus: 10.0,
            unblurred_bonus: 5.0,
        }
    }
}

impl QualityWeights {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            ("per_mib", self.per_mib),
            ("per_megapixel", self.per_megapixel),
            ("per_sharpness_unit", self.per_sharpness_unit),
            ("sidecar_bonus", self.sidecar_bonus),
            ("unblurred_bonus", self.unblurred_bonus),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number", name));
            }
        }
        Ok(())
    }

    /// Composite score of a decoded image
    pub fn image_score(
        &self,
        size: u64,
        resolution: Resolution,
        sharpness: f64,
        has_sidecar: bool,
        blurry: bool,
    ) -> f64 {
        let mut score = self.size_score(size)
            + self.per_megapixel * resolution.megapixels()
            + self.per_sharpness_unit * sharpness;
        if has_sidecar {
            score += self.sidecar_bonus;
        }
        if !blurry {
            score += self.unblurred_bonus;
        }
        score
    }

    /// Score of a file that could not be analyzed as an image
    pub fn size_score(&self, size: u64) -> f64 {
        self.per_mib * size as f64 / MIB
    }
}

/// Variance of the 4-neighbour Laplacian `[0 1 0; 1 -4 1; 0 1 0]`
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let pixel = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut count = 0f64;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let laplacian = pixel(x, y - 1) + pixel(x, y + 1) + pixel(x - 1, y) + pixel(x + 1, y)
                - 4.0 * pixel(x, y);
            count += 1.0;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// What happened to a record in the assessment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessOutcome {
    Scored,
    /// Already scored for this stamp
    Cached,
    /// Not eligible (failed earlier)
    Skipped,
    Failed(FailureReason),
}

/// Per-file quality assessment
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    blur_threshold: f64,
    min_resolution: u64,
    min_size_bytes: u64,
    analysis_size: u32,
    weights: QualityWeights,
}

impl QualityAssessor {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            blur_threshold: config.blur_threshold,
            min_resolution: config.min_resolution,
            min_size_bytes: config.min_size_bytes,
            analysis_size: config.analysis_size,
            weights: config.quality_weights.clone(),
        }
    }

    /// Sharpness of a decoded image, measured on its grayscale reduction
    pub fn sharpness(
        &self,
        reducer: &mut GrayReducer,
        image: &image::DynamicImage,
        path: &std::path::Path,
    ) -> Result<f64, QualityError> {
        let gray = reducer.reduce(image, path)?;
        Ok(laplacian_variance(&gray))
    }

    /// Flags implied by the measurements
    pub fn flags(&self, size: u64, resolution: Option<Resolution>, sharpness: Option<f64>) -> Vec<QualityFlag> {
        let mut flags = Vec::new();
        let small_file = size < self.min_size_bytes;
        let small_picture = resolution
            .map(|r| r.area() < self.min_resolution)
            .unwrap_or(false);
        if small_file || small_picture {
            flags.push(QualityFlag::TooSmall);
        }
        if sharpness.map(|s| s < self.blur_threshold).unwrap_or(false) {
            flags.push(QualityFlag::Blurry);
        }
        flags
    }

    /// Advance a hashed record to `Scored`.
    ///
    /// Decode failures are written onto the record as `Corrupted`.
    pub fn assess(&self, record: &mut FileRecord) -> AssessOutcome {
        if record.state == RecordState::Failed || !record.state.reached(RecordState::Hashed) {
            return AssessOutcome::Skipped;
        }
        if record.state.reached(RecordState::Scored) {
            return AssessOutcome::Cached;
        }

        let sidecar_path = metadata::find_sidecar(&record.path);
        let sidecar: Option<SidecarMetadata> =
            sidecar_path.as_deref().and_then(metadata::read_sidecar);
        let exif = metadata::read_exif(&record.path);

        let (resolution, sharpness) = match record.media_kind {
            MediaKind::Image => match self.measure_image(record) {
                Ok((resolution, sharpness)) => (Some(resolution), Some(sharpness)),
                Err(error) => {
                    let reason = match &error {
                        QualityError::Io { source, .. } => match FailureReason::from_io(source) {
                            FailureReason::Io => FailureReason::Corrupted,
                            other => other,
                        },
                        _ => FailureReason::Corrupted,
                    };
                    tracing::warn!(path = %record.path.display(), %reason, "assessment failed: {}", error);
                    record.mark_failed(reason, error.to_string());
                    return AssessOutcome::Failed(reason);
                }
            },
            MediaKind::Video | MediaKind::Unsupported => (exif.resolution(), None),
        };

        if let Some((at, source)) =
            metadata::resolve_capture_time(exif.date_taken, sidecar.as_ref(), &record.stamp)
        {
            record.captured_at = Some(at);
            record.timestamp_source = Some(source);
        }

        let flags = self.flags(record.size, resolution, sharpness);
        let blurry = flags.contains(&QualityFlag::Blurry);
        record.quality_score = Some(match (resolution, sharpness) {
            (Some(resolution), Some(sharpness)) => self.weights.image_score(
                record.size,
                resolution,
                sharpness,
                sidecar_path.is_some(),
                blurry,
            ),
            _ => self.weights.size_score(record.size),
        });
        record.resolution = resolution;
        record.sharpness = sharpness;
        record.flags = flags;
        record.sidecar = sidecar_path;
        record.state = RecordState::Scored;

        tracing::debug!(
            path = %record.path.display(),
            score = record.quality_score,
            sharpness = record.sharpness,
            "scored"
        );
        AssessOutcome::Scored
    }

    fn measure_image(&self, record: &FileRecord) -> Result<(Resolution, f64), QualityError> {
        let image = FastDecoder::decode(&record.path)?;
        let resolution = Resolution::new(image.width(), image.height());
        let mut reducer = GrayReducer::new(self.analysis_size);
        let sharpness = self.sharpness(&mut reducer, &image, &record.path)?;
        Ok((resolution, sharpness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::SourceStamp;
    use image::{DynamicImage, ImageBuffer, Luma, RgbImage};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn uniform(value: u8, size: u32) -> GrayImage {
        ImageBuffer::from_fn(size, size, |_, _| Luma([value]))
    }

    fn checkerboard(size: u32) -> GrayImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    fn config() -> TriageConfig {
        let mut config = TriageConfig::new("/src", "/dst");
        config.min_size_bytes = 0;
        config.min_resolution = 0;
        config
    }

    fn hashed(path: PathBuf) -> FileRecord {
        let stamp = SourceStamp::from_metadata(&fs::metadata(&path).unwrap());
        let kind = MediaKind::from_path(&path, &["mp4".to_string()]);
        let mut record = FileRecord::new(path, stamp, kind);
        record.hash = Some("h".to_string());
        record.state = RecordState::Hashed;
        record
    }

    #[test]
    fn uniform_image_has_no_sharpness() {
        assert!(laplacian_variance(&uniform(128, 64)) < 1e-9);
    }

    #[test]
    fn checkerboard_is_very_sharp() {
        assert!(laplacian_variance(&checkerboard(64)) > 1000.0);
    }

    #[test]
    fn tiny_images_have_zero_variance() {
        assert_eq!(laplacian_variance(&checkerboard(2)), 0.0);
    }

    #[test]
    fn default_weights_follow_documented_formula() {
        let weights = QualityWeights::default();
        let score = weights.image_score(
            2 * 1024 * 1024,
            Resolution::new(2000, 1000),
            300.0,
            true,
            false,
        );
        // 2 MiB + 2 MP + 3 sharpness + 10 sidecar + 5 unblurred
        assert!((score - 22.0).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn negative_weight_is_invalid() {
        let weights = QualityWeights {
            per_mib: -1.0,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
        assert!(QualityWeights::default().validate().is_ok());
    }

    #[test]
    fn flags_follow_floors() {
        let mut config = config();
        config.min_size_bytes = 100;
        config.min_resolution = 10_000;
        config.blur_threshold = 50.0;
        let assessor = QualityAssessor::from_config(&config);

        assert!(assessor.flags(1000, Some(Resolution::new(200, 200)), Some(80.0)).is_empty());
        assert_eq!(
            assessor.flags(10, Some(Resolution::new(200, 200)), Some(80.0)),
            vec![QualityFlag::TooSmall]
        );
        assert_eq!(
            assessor.flags(1000, Some(Resolution::new(50, 50)), Some(10.0)),
            vec![QualityFlag::TooSmall, QualityFlag::Blurry]
        );
        assert!(assessor.flags(1000, None, None).is_empty());
    }

    #[test]
    fn assess_scores_a_sharp_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sharp.png");
        DynamicImage::ImageLuma8(checkerboard(64)).save(&path).unwrap();

        let mut record = hashed(path);
        let assessor = QualityAssessor::from_config(&config());
        assert_eq!(assessor.assess(&mut record), AssessOutcome::Scored);

        assert_eq!(record.state, RecordState::Scored);
        assert_eq!(record.resolution, Some(Resolution::new(64, 64)));
        assert!(record.sharpness.unwrap() > 1000.0);
        assert!(record.flags.is_empty());
        assert_eq!(
            record.timestamp_source,
            Some(crate::core::record::TimestampSource::Filesystem)
        );
    }

    #[test]
    fn smooth_image_is_flagged_blurry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flat.png");
        RgbImage::from_pixel(64, 64, image::Rgb([90, 90, 90]))
            .save(&path)
            .unwrap();

        let mut record = hashed(path);
        QualityAssessor::from_config(&config()).assess(&mut record);
        assert!(record.has_flag(QualityFlag::Blurry));
    }

    #[test]
    fn undecodable_image_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"\x89PNG\r\n\x1a\nbroken").unwrap();

        let mut record = hashed(path);
        let outcome = QualityAssessor::from_config(&config()).assess(&mut record);
        assert_eq!(outcome, AssessOutcome::Failed(FailureReason::Corrupted));
        assert!(record.is_corrupted());
    }

    #[test]
    fn video_gets_size_only_score() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, vec![0u8; 2 * 1024 * 1024]).unwrap();

        let mut record = hashed(path);
        QualityAssessor::from_config(&config()).assess(&mut record);
        assert_eq!(record.state, RecordState::Scored);
        assert!(record.sharpness.is_none());
        assert!((record.quality_score.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sidecar_time_and_bonus_are_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_1.png");
        DynamicImage::ImageLuma8(checkerboard(64)).save(&path).unwrap();
        fs::write(
            dir.path().join("IMG_1.png.json"),
            r#"{"photoTakenTime": {"timestamp": "1500000000"}}"#,
        )
        .unwrap();

        let mut with_sidecar = hashed(path.clone());
        QualityAssessor::from_config(&config()).assess(&mut with_sidecar);
        assert_eq!(with_sidecar.captured_at.unwrap().timestamp(), 1_500_000_000);
        assert!(with_sidecar.sidecar.is_some());

        fs::remove_file(dir.path().join("IMG_1.png.json")).unwrap();
        let mut without = hashed(path);
        QualityAssessor::from_config(&config()).assess(&mut without);
        let bonus = with_sidecar.quality_score.unwrap() - without.quality_score.unwrap();
        assert!((bonus - 10.0).abs() < 1e-9);
    }

    #[test]
    fn failed_records_are_skipped() {
        let mut record = FileRecord::new(
            Path::new("/x.jpg").to_path_buf(),
            SourceStamp {
                size: 0,
                modified_secs: 0,
                modified_nanos: 0,
            },
            MediaKind::Image,
        );
        record.mark_failed(FailureReason::Corrupted, "empty");
        assert_eq!(
            QualityAssessor::from_config(&config()).assess(&mut record),
            AssessOutcome::Skipped
        );
    }
}
