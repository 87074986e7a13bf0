//! # Error Module
//!
//! Error taxonomy for the triage pipeline.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Per-file problems are data, not errors** - they become a
//!   [`FailureReason`](crate::core::record::FailureReason) on the record
//! - **Include context** - paths, file names, what went wrong
//! - **Recovery hints** - suggest how to fix when possible

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Organize error: {0}")]
    Organize(#[from] OrganizeError),

    #[error("Destination {path} is not writable: {reason}. No files were moved.")]
    DestinationUnwritable { path: PathBuf, reason: String },

    #[error("No space left on the volume holding {path}. Progress was saved; free some space and run again.")]
    DiskFull { path: PathBuf },
}

impl TriageError {
    /// Whether running again later can succeed without changing configuration
    pub fn is_retryable(&self) -> bool {
        matches!(self, TriageError::DiskFull { .. })
    }
}

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Source root does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Source root is not a directory: {path}")]
    SourceNotDirectory { path: PathBuf },

    #[error("Destination root must be set")]
    DestinationMissing,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Manifest at {manifest} belongs to source {recorded}, not {requested}")]
    ManifestSourceMismatch {
        manifest: PathBuf,
        recorded: PathBuf,
        requested: PathBuf,
    },
}

/// Errors that occur during scanning
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-file fingerprinting failures
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File is empty: {path}")]
    Empty { path: PathBuf },

    #[error("File {path} is truncated: expected {expected} bytes, read {actual}")]
    Truncated {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Per-file quality assessment failures
#[derive(Error, Debug)]
pub enum QualityError {
    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Image has no pixels: {path}")]
    EmptyImage { path: PathBuf },

    #[error("Failed to reduce image {path}: {reason}")]
    Resize { path: PathBuf, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reading or writing the processing manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest {path} is corrupted ({reason}). Move it aside to start over.")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(String),
}

/// Errors applying review decisions and other organize-level operations
#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("Unknown group: {group_id}")]
    UnknownGroup { group_id: String },

    #[error("Group {group_id} has no recommended member")]
    NoRecommendation { group_id: String },

    #[error("Group {group_id} was already reviewed with a different decision")]
    ConflictingDecision { group_id: String },

    #[error("Group {group_id} has no record for member {path}")]
    UnknownMember { group_id: String, path: PathBuf },

    #[error("Failed to place {path}: {source}")]
    Placement {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, TriageError>;
