//! # Organize Module
//!
//! Materializes the triage result on disk: accepted files into a
//! year/month tree, everything else into review folders.
//!
//! Planning is single-threaded over the resolved record set so names are
//! assigned deterministically; execution runs placements in parallel.
//! Nothing here ever deletes or truncates a source file in copy mode, and
//! no existing destination file is ever replaced.

mod executor;
mod planner;
mod types;

pub use executor::{copy_no_clobber, move_no_clobber, transfer_for, OrganizeExecutor, TransferFn};
pub use planner::{
    accepted_folder, review_folder, OrganizePlanner, ORGANIZED_DIR, RECOMMENDED_PREFIX,
    REVIEW_DIR, UNDATED_DIR,
};
pub use types::*;

use crate::core::manifest::ProcessingManifest;
use crate::core::record::{FailureReason, RecordState};
use std::path::Path;

/// Write placement outcomes back onto their records.
///
/// Placed and adopted records become `Organized`. A failed record stays
/// `Resolved` with the failure noted, so the next run retries it. A
/// corrupted record keeps `Corrupted` as its reason either way.
pub fn apply_outcome(manifest: &mut ProcessingManifest, source: &Path, outcome: &PlacementOutcome) {
    let Some(record) = manifest.record_mut(source) else {
        return;
    };

    match outcome {
        PlacementOutcome::Placed { destination, .. } | PlacementOutcome::Adopted { destination } => {
            record.destination = Some(destination.clone());
            record.state = RecordState::Organized;
            if record.failure != Some(FailureReason::Corrupted) {
                record.failure = None;
                record.failure_detail = None;
            }
        }
        PlacementOutcome::Failed { reason, detail } => {
            if record.failure != Some(FailureReason::Corrupted) {
                record.failure = Some(*reason);
            }
            record.failure_detail = Some(detail.clone());
        }
        PlacementOutcome::Skipped => {}
    }
}
