//! # Config Module
//!
//! Everything the core consumes, in one serde-friendly struct.
//!
//! Values come from three layers, last one wins: built-in defaults, an
//! optional JSON config file, and CLI flags. Every field has a default and
//! unknown keys are ignored, so old config files keep working.

use crate::core::organize::OperationMode;
use crate::core::quality::QualityWeights;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (under the destination root) holding pipeline state
pub const STATE_DIR: &str = ".photo-triage";

/// Image extensions recognized by default
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "gif", "bmp", "webp", "tif", "tiff",
];

/// Video extensions recognized by default
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "wmv", "m4v", "3gp"];

/// Configuration surface of the triage core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Root of the archive export to process
    pub source_root: PathBuf,
    /// Root of the organized output
    pub destination_root: PathBuf,
    /// Manifest location (defaults inside the destination root)
    pub manifest_path: Option<PathBuf>,
    /// Workers per parallel stage
    pub worker_threads: usize,
    /// Capacity of the scanner → fingerprinter queue
    pub queue_capacity: usize,
    /// Laplacian variance below which an image is flagged blurry
    pub blur_threshold: f64,
    /// Pixel area below which an image is flagged too small
    pub min_resolution: u64,
    /// Byte size below which a file is flagged too small
    pub min_size_bytes: u64,
    /// Maximum gap between consecutive captures of one burst
    pub burst_window_seconds: f64,
    /// Whether filesystem modification times may place a file in a burst
    pub burst_use_filesystem_time: bool,
    /// Longest edge of the grayscale reduction used for sharpness
    pub analysis_size: u32,
    /// Composite quality score policy
    pub quality_weights: QualityWeights,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    /// Copy (default) or move accepted files
    pub operation: OperationMode,
    /// Records between manifest flushes
    pub flush_every: usize,
    /// Minimum spacing of progress events
    pub progress_interval_ms: u64,
    /// Completed items in the ETA moving window
    pub eta_window: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            destination_root: PathBuf::new(),
            manifest_path: None,
            worker_threads: default_worker_threads(),
            queue_capacity: 256,
            blur_threshold: 100.0,
            min_resolution: 100_000,
            min_size_bytes: 50 * 1024,
            burst_window_seconds: 10.0,
            burst_use_filesystem_time: true,
            analysis_size: 512,
            quality_weights: QualityWeights::default(),
            image_extensions: to_strings(DEFAULT_IMAGE_EXTENSIONS),
            video_extensions: to_strings(DEFAULT_VIDEO_EXTENSIONS),
            include_hidden: false,
            follow_symlinks: false,
            operation: OperationMode::Copy,
            flush_every: 500,
            progress_interval_ms: 250,
            eta_window: 200,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Four workers, fewer on machines that have fewer cores
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 4)
}

impl TriageConfig {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Resolved manifest path
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path.clone().unwrap_or_else(|| {
            self.destination_root
                .join(STATE_DIR)
                .join("manifest.json")
        })
    }

    /// All extensions the scanner should pick up
    pub fn scan_extensions(&self) -> Vec<String> {
        self.image_extensions
            .iter()
            .chain(self.video_extensions.iter())
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect()
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_secs_f64(self.burst_window_seconds)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Check everything that can be checked before touching any file
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_root.exists() {
            return Err(ConfigError::SourceMissing {
                path: self.source_root.clone(),
            });
        }
        if !self.source_root.is_dir() {
            return Err(ConfigError::SourceNotDirectory {
                path: self.source_root.clone(),
            });
        }
        if self.destination_root.as_os_str().is_empty() {
            return Err(ConfigError::DestinationMissing);
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if !self.blur_threshold.is_finite() || self.blur_threshold < 0.0 {
            return Err(invalid("blur_threshold", "must be a non-negative number"));
        }
        if !self.burst_window_seconds.is_finite() || self.burst_window_seconds <= 0.0 {
            return Err(invalid("burst_window_seconds", "must be greater than zero"));
        }
        if self.analysis_size < 3 {
            return Err(invalid("analysis_size", "must be at least 3 pixels"));
        }
        if self.scan_extensions().is_empty() {
            return Err(invalid("image_extensions", "no extensions to scan"));
        }
        self.quality_weights
            .validate()
            .map_err(|reason| invalid("quality_weights", reason))?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(dir: &TempDir) -> TriageConfig {
        TriageConfig::new(dir.path(), dir.path().join("out"))
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = TriageConfig::default();
        assert!(config.worker_threads >= 1 && config.worker_threads <= 4);
        assert_eq!(config.burst_window_seconds, 10.0);
        assert_eq!(config.blur_threshold, 100.0);
        assert_eq!(config.operation, OperationMode::Copy);
    }

    #[test]
    fn valid_config_passes() {
        let dir = TempDir::new().unwrap();
        assert!(valid_config(&dir).validate().is_ok());
    }

    #[test]
    fn missing_source_is_fatal() {
        let config = TriageConfig::new("/nonexistent/source/12345", "/tmp/out");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SourceMissing { .. })
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.worker_threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "worker_threads", .. })
        ));
    }

    #[test]
    fn non_positive_burst_window_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.burst_window_seconds = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn manifest_defaults_into_destination() {
        let config = TriageConfig::new("/src", "/out");
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/out/.photo-triage/manifest.json")
        );
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"source_root": "/src", "destination_root": "/out", "blur_threshold": 42.5, "unknown": 1}"#,
        )
        .unwrap();

        let config = TriageConfig::from_file(&path).unwrap();
        assert_eq!(config.blur_threshold, 42.5);
        assert_eq!(config.burst_window_seconds, 10.0);
        assert_eq!(config.source_root, PathBuf::from("/src"));
    }

    #[test]
    fn scan_extensions_are_normalized() {
        let mut config = TriageConfig::default();
        config.image_extensions = vec![".JPG".to_string()];
        config.video_extensions = vec!["Mov".to_string()];
        assert_eq!(config.scan_extensions(), vec!["jpg", "mov"]);
    }
}
