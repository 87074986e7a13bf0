//! # Record Module
//!
//! Per-file records and the groups they end up in.
//!
//! A [`FileRecord`] is created the first time the scanner sees a path and is
//! updated in place as it moves through the pipeline:
//!
//! `Scanned → Hashed → Scored → Grouped → Resolved → Organized`, or `Failed`.

mod group;

pub use group::{Category, Group};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Scanned,
    Hashed,
    Scored,
    Grouped,
    Resolved,
    Organized,
    Failed,
}

impl RecordState {
    fn rank(self) -> Option<u8> {
        match self {
            RecordState::Scanned => Some(0),
            RecordState::Hashed => Some(1),
            RecordState::Scored => Some(2),
            RecordState::Grouped => Some(3),
            RecordState::Resolved => Some(4),
            RecordState::Organized => Some(5),
            RecordState::Failed => None,
        }
    }

    /// Whether this state is at or past `stage` in the lifecycle.
    ///
    /// `Failed` is off the lifecycle and has reached nothing.
    pub fn reached(self, stage: RecordState) -> bool {
        match (self.rank(), stage.rank()) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }
}

/// Why a record could not be processed normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unreadable, truncated, empty or undecodable content
    Corrupted,
    /// The file (or its destination) could not be accessed
    PermissionDenied,
    /// The destination volume ran out of space
    DiskFull,
    /// The source disappeared between scanning and processing
    Missing,
    /// Any other I/O failure
    Io,
}

impl FailureReason {
    /// Classify an I/O error
    pub fn from_io(error: &io::Error) -> Self {
        if is_disk_full(error) {
            return FailureReason::DiskFull;
        }
        match error.kind() {
            io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
            io::ErrorKind::NotFound => FailureReason::Missing,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => FailureReason::Corrupted,
            _ => FailureReason::Io,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Corrupted => write!(f, "corrupted"),
            FailureReason::PermissionDenied => write!(f, "permission denied"),
            FailureReason::DiskFull => write!(f, "disk full"),
            FailureReason::Missing => write!(f, "missing"),
            FailureReason::Io => write!(f, "I/O error"),
        }
    }
}

/// Whether an I/O error means the volume has no space left
pub fn is_disk_full(error: &io::Error) -> bool {
    #[cfg(unix)]
    const NO_SPACE: &[i32] = &[28]; // ENOSPC
    #[cfg(windows)]
    const NO_SPACE: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    #[cfg(not(any(unix, windows)))]
    const NO_SPACE: &[i32] = &[];

    error
        .raw_os_error()
        .map(|code| NO_SPACE.contains(&code))
        .unwrap_or(false)
}

/// What kind of media a file is, as far as quality assessment cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// An image format we can decode
    Image,
    /// A video; never decoded
    Video,
    /// A recognized extension we cannot decode (e.g. HEIC)
    Unsupported,
}

impl MediaKind {
    /// Classify by extension, given the configured video extensions
    pub fn from_path(path: &Path, video_extensions: &[String]) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return MediaKind::Unsupported;
        };
        let ext = ext.to_lowercase();

        if video_extensions.iter().any(|v| v.eq_ignore_ascii_case(&ext)) {
            return MediaKind::Video;
        }

        match image::ImageFormat::from_extension(&ext) {
            Some(format) if format.reading_enabled() => MediaKind::Image,
            _ => MediaKind::Unsupported,
        }
    }
}

/// Where a capture timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Exif,
    Sidecar,
    Filesystem,
}

/// Categorical quality defects, independent of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    TooSmall,
    Blurry,
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn megapixels(&self) -> f64 {
        self.area() as f64 / 1_000_000.0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Size and modification time of a source file when it was observed.
///
/// A cached hash is reused only while the stamp is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub size: u64,
    pub modified_secs: i64,
    #[serde(default)]
    pub modified_nanos: u32,
}

impl SourceStamp {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let (modified_secs, modified_nanos) = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        Self {
            size: metadata.len(),
            modified_secs,
            modified_nanos,
        }
    }

    /// Modification time as a UTC timestamp
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.modified_secs, self.modified_nanos)
    }
}

/// Everything the pipeline knows about one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute source path
    pub path: PathBuf,
    /// Size and mtime when scanned
    pub stamp: SourceStamp,
    /// Byte size observed while hashing
    #[serde(default)]
    pub size: u64,
    pub media_kind: MediaKind,
    /// Hex BLAKE3 digest of the content
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp_source: Option<TimestampSource>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Laplacian variance (higher = sharper)
    #[serde(default)]
    pub sharpness: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub flags: Vec<QualityFlag>,
    #[serde(default)]
    pub sidecar: Option<PathBuf>,
    pub state: RecordState,
    #[serde(default)]
    pub failure: Option<FailureReason>,
    #[serde(default)]
    pub failure_detail: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub recommended: bool,
    /// Where the organizer put the file
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

impl FileRecord {
    /// A freshly scanned record
    pub fn new(path: PathBuf, stamp: SourceStamp, media_kind: MediaKind) -> Self {
        Self {
            path,
            size: stamp.size,
            stamp,
            media_kind,
            hash: None,
            captured_at: None,
            timestamp_source: None,
            resolution: None,
            sharpness: None,
            quality_score: None,
            flags: Vec::new(),
            sidecar: None,
            state: RecordState::Scanned,
            failure: None,
            failure_detail: None,
            category: None,
            group_id: None,
            recommended: false,
            destination: None,
        }
    }

    /// Whether the file on disk still matches what was recorded
    pub fn matches_stamp(&self, stamp: &SourceStamp) -> bool {
        self.stamp == *stamp
    }

    pub fn is_organized(&self) -> bool {
        self.state == RecordState::Organized
    }

    pub fn is_corrupted(&self) -> bool {
        self.failure == Some(FailureReason::Corrupted)
    }

    /// Record a failure without throwing it up the batch
    pub fn mark_failed(&mut self, reason: FailureReason, detail: impl Into<String>) {
        self.state = RecordState::Failed;
        self.failure = Some(reason);
        self.failure_detail = Some(detail.into());
    }

    /// Forget group membership after the group was dissolved.
    ///
    /// A record not yet placed goes back to `Scored` so the next grouping
    /// pass considers it again; a placed record stays where it is.
    pub fn release_from_group(&mut self) {
        self.group_id = None;
        self.category = None;
        self.recommended = false;
        if matches!(self.state, RecordState::Grouped | RecordState::Resolved) {
            self.state = RecordState::Scored;
        }
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn resolution_area(&self) -> u64 {
        self.resolution.map(|r| r.area()).unwrap_or(0)
    }

    /// Stable identity used for ids and name suffixes: the content hash, or a
    /// digest of the path when no hash could be computed.
    pub fn identity(&self) -> String {
        match &self.hash {
            Some(hash) => hash.clone(),
            None => blake3::hash(self.path.to_string_lossy().as_bytes())
                .to_hex()
                .to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string())
    }
}
