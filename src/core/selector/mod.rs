//! # Selector Module
//!
//! Picks the recommended keeper of every duplicate and burst group.
//!
//! Members are ranked by, in order:
//! 1. composite quality score, highest first
//! 2. byte size, largest first
//! 3. resolution area, largest first
//! 4. source path, lexicographically smallest first
//!
//! The last key makes the order total, so identical inputs always produce
//! the same recommendation.

use crate::core::manifest::ProcessingManifest;
use crate::core::record::{FileRecord, RecordState};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Ranking used to choose a keeper; `Less` means `a` is the better pick
pub fn rank(a: &FileRecord, b: &FileRecord) -> Ordering {
    let score = |r: &FileRecord| r.quality_score.unwrap_or(f64::NEG_INFINITY);
    score(b)
        .total_cmp(&score(a))
        .then_with(|| b.size.cmp(&a.size))
        .then_with(|| b.resolution_area().cmp(&a.resolution_area()))
        .then_with(|| a.path.cmp(&b.path))
}

/// Best member of a set of records
pub fn select_best<'r>(members: &[&'r FileRecord]) -> Option<&'r FileRecord> {
    members.iter().copied().min_by(|a, b| rank(a, b))
}

/// Resolve every grouped record in the manifest.
///
/// Clusters get a recommendation; flag groups and accepted singles need
/// none. Returns the number of recommendations made.
pub fn resolve_manifest(manifest: &mut ProcessingManifest) -> usize {
    let unresolved: Vec<(String, Option<PathBuf>)> = manifest
        .groups()
        .filter(|g| g.category.requires_recommendation() && g.recommended.is_none())
        .map(|group| {
            let members: Vec<&FileRecord> = group
                .members
                .iter()
                .filter_map(|path| manifest.record(path))
                .collect();
            (group.id.clone(), select_best(&members).map(|r| r.path.clone()))
        })
        .collect();

    let mut recommended = 0;
    for (group_id, best) in unresolved {
        let Some(best) = best else {
            tracing::warn!(group = %group_id, "group has no known members");
            continue;
        };
        if let Some(group) = manifest.group_mut(&group_id) {
            group.recommended = Some(best.clone());
        }
        if let Some(record) = manifest.record_mut(&best) {
            record.recommended = true;
        }
        tracing::debug!(group = %group_id, keeper = %best.display(), "recommended");
        recommended += 1;
    }

    for record in manifest.records_mut() {
        if record.state == RecordState::Grouped {
            record.state = RecordState::Resolved;
        }
    }

    recommended
}
