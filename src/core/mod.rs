//! # Core Module
//!
//! The UI-agnostic triage engine.
//!
//! ## Modules
//! - `record` - Per-file records, groups and their lifecycle
//! - `manifest` - Persisted record set; the basis for resuming
//! - `scanner` - Discovers media files under the source root
//! - `fingerprint` - Streams file content through BLAKE3
//! - `metadata` - EXIF and sidecar capture times
//! - `quality` - Sharpness, resolution and the composite score
//! - `grouper` - Duplicate and burst clusters, flagged singles
//! - `selector` - Deterministic keeper per cluster
//! - `organize` - Plans and performs copies/moves into the output tree
//! - `review` - Applies human decisions to review groups
//! - `progress` - Run state, counters, ETA and cancellation
//! - `pipeline` - Orchestrates the full workflow

pub mod fingerprint;
pub mod grouper;
pub mod manifest;
pub mod metadata;
pub mod organize;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod record;
pub mod review;
pub mod scanner;
pub mod selector;

// Re-export commonly used types
pub use manifest::ProcessingManifest;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use progress::{CancellationToken, ProgressController, RunState};
pub use record::{Category, FailureReason, FileRecord, Group, RecordState};
pub use review::ReviewDecision;
