//! Deciding how much work a scanned file still needs.

use crate::core::manifest::ProcessingManifest;
use crate::core::record::{FailureReason, FileRecord, RecordState};
use crate::core::scanner::ScanCandidate;
use std::collections::HashMap;
use std::path::PathBuf;

/// Work needed for one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum IngestPlan {
    /// Nothing to do this run; `cached_hash` when a stored hash was reused
    Skip { cached_hash: bool },
    /// Hash is valid, only quality assessment is missing
    Assess(FileRecord),
    /// Hash and assess from scratch
    Full(FileRecord),
}

/// Snapshot of unfinished manifest records, taken before the scan starts
#[derive(Debug, Default)]
pub struct PendingRecords {
    records: HashMap<PathBuf, FileRecord>,
}

impl PendingRecords {
    pub fn from_manifest(manifest: &ProcessingManifest) -> Self {
        Self {
            records: manifest
                .records()
                .filter(|r| !r.is_organized())
                .map(|r| (r.path.clone(), r.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn plan(&self, candidate: ScanCandidate) -> IngestPlan {
        let fresh = |c: ScanCandidate| FileRecord::new(c.path, c.stamp, c.media_kind);

        let Some(existing) = self.records.get(&candidate.path) else {
            return IngestPlan::Full(fresh(candidate));
        };
        if !existing.matches_stamp(&candidate.stamp) {
            tracing::debug!(path = %candidate.path.display(), "file changed since last run");
            return IngestPlan::Full(fresh(candidate));
        }

        match existing.state {
            // Corrupted records are waiting to be grouped into review
            RecordState::Failed if existing.failure == Some(FailureReason::Corrupted) => {
                IngestPlan::Skip { cached_hash: false }
            }
            RecordState::Failed | RecordState::Scanned => IngestPlan::Full(fresh(candidate)),
            RecordState::Hashed => IngestPlan::Assess(existing.clone()),
            RecordState::Scored
            | RecordState::Grouped
            | RecordState::Resolved
            | RecordState::Organized => IngestPlan::Skip {
                cached_hash: existing.hash.is_some(),
            },
        }
    }
}
