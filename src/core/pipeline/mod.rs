//! # Pipeline Module
//!
//! Orchestrates the full triage workflow.
//!
//! ## Pipeline Stages
//! 1. **Scan** - Walk the source tree, skipping files already organized
//! 2. **Fingerprint** - BLAKE3 content hash (reused from the manifest when unchanged)
//! 3. **Assess** - Sharpness, resolution, capture time and quality flags
//! 4. **Group** - Duplicates, bursts and flagged singles
//! 5. **Select** - Recommend one keeper per duplicate/burst group
//! 6. **Organize** - Copy or move into the dated tree and review folders
//!
//! ## Parallelism
//! Stages 1-3 run concurrently: the scanner feeds a bounded queue that a
//! fixed set of worker threads drains. Stages 4-6 need the complete record
//! set, so they start only after every worker has finished.

mod executor;
mod ingest;

pub use executor::{Pipeline, PipelineBuilder};
pub use ingest::{IngestPlan, PendingRecords};
