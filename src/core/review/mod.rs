//! # Review Module
//!
//! Human decisions on groups waiting in the review folders.
//!
//! A decision copies the chosen members into the dated tree next to the
//! accepted files; it never deletes or moves anything out of review.
//! Decisions are recorded in the manifest, and applying the same decision
//! to the same group again does nothing.

use crate::core::manifest::ProcessingManifest;
use crate::core::organize::{copy_no_clobber, OrganizePlanner, PlannedPlacement};
use crate::core::record::{is_disk_full, Group};
use crate::error::{OrganizeError, Result, TriageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with a reviewed group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Keep only the recommended member
    KeepRecommended,
    /// Keep every member
    KeepAll,
    /// Keep nothing from this group in the dated tree
    Dismiss,
}

impl std::str::FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "keep_recommended" | "keep_best" => Ok(ReviewDecision::KeepRecommended),
            "keep_all" => Ok(ReviewDecision::KeepAll),
            "dismiss" => Ok(ReviewDecision::Dismiss),
            other => Err(format!(
                "unknown decision '{}' (expected keep-recommended, keep-all or dismiss)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewDecision::KeepRecommended => write!(f, "keep-recommended"),
            ReviewDecision::KeepAll => write!(f, "keep-all"),
            ReviewDecision::Dismiss => write!(f, "dismiss"),
        }
    }
}

/// A decision as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub group_id: String,
    pub decision: ReviewDecision,
    pub applied_at: DateTime<Utc>,
    /// Files written into the dated tree
    #[serde(default)]
    pub placed: Vec<PathBuf>,
}

/// Groups still waiting for a decision
pub fn pending_groups(manifest: &ProcessingManifest) -> Vec<&Group> {
    manifest
        .groups()
        .filter(|g| manifest.decision_for(&g.id).is_none())
        .collect()
}

/// Apply a decision to a group and record it.
///
/// The caller persists the manifest afterwards.
pub fn apply_review_decision(
    manifest: &mut ProcessingManifest,
    destination_root: &Path,
    group_id: &str,
    decision: ReviewDecision,
) -> Result<AppliedDecision> {
    let group = manifest
        .group(group_id)
        .cloned()
        .ok_or_else(|| OrganizeError::UnknownGroup {
            group_id: group_id.to_string(),
        })?;

    if let Some(previous) = manifest.decision_for(group_id) {
        if previous.decision == decision {
            tracing::info!(group = group_id, %decision, "decision already applied");
            return Ok(previous.clone());
        }
        return Err(OrganizeError::ConflictingDecision {
            group_id: group_id.to_string(),
        }
        .into());
    }

    let keep: Vec<PathBuf> = match decision {
        ReviewDecision::KeepRecommended => {
            let keeper = group
                .recommended
                .clone()
                .ok_or_else(|| OrganizeError::NoRecommendation {
                    group_id: group_id.to_string(),
                })?;
            vec![keeper]
        }
        ReviewDecision::KeepAll => group.members.clone(),
        ReviewDecision::Dismiss => Vec::new(),
    };

    let mut planner = OrganizePlanner::new(destination_root, manifest);
    let mut placed = Vec::with_capacity(keep.len());

    for member in &keep {
        let record = manifest
            .record(member)
            .ok_or_else(|| OrganizeError::UnknownMember {
                group_id: group_id.to_string(),
                path: member.clone(),
            })?;

        // Move mode may have taken the file out of the source tree already
        let current = record
            .destination
            .clone()
            .filter(|d| d.exists())
            .unwrap_or_else(|| record.path.clone());

        let placement = planner.plan_accepted(record);
        if !placement.adopt {
            copy_no_clobber(&current, &placement.destination).map_err(|e| {
                if is_disk_full(&e) {
                    TriageError::DiskFull {
                        path: placement.destination.clone(),
                    }
                } else {
                    OrganizeError::Placement {
                        path: current.clone(),
                        source: e,
                    }
                    .into()
                }
            })?;
        }
        place_sidecar(&current, record.sidecar.as_deref(), &placement);
        placed.push(placement.destination);
    }

    let applied = AppliedDecision {
        group_id: group_id.to_string(),
        decision,
        applied_at: Utc::now(),
        placed,
    };
    manifest.push_decision(applied.clone());

    tracing::info!(group = group_id, %decision, files = applied.placed.len(), "review decision applied");
    Ok(applied)
}

/// Carry the sidecar along with a kept member. Best effort, like the
/// organizer: a missing or unwritable sidecar never fails the decision.
fn place_sidecar(current: &Path, original: Option<&Path>, placement: &PlannedPlacement) {
    let Some(destination) = placement.sidecar_destination() else {
        return;
    };
    if destination.exists() {
        return;
    }

    // Move mode may have carried the sidecar next to the review copy
    let beside_current = current
        .file_name()
        .map(|name| current.with_file_name(format!("{}.json", name.to_string_lossy())));
    let Some(source) = beside_current
        .into_iter()
        .chain(original.map(Path::to_path_buf))
        .find(|p| p.exists())
    else {
        return;
    };

    if let Err(e) = copy_no_clobber(&source, &destination) {
        tracing::warn!(path = %source.display(), "sidecar not placed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{Category, FileRecord, MediaKind, RecordState, SourceStamp};
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        dst: PathBuf,
        manifest: ProcessingManifest,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        let mut manifest = ProcessingManifest::new(src.clone(), dst.clone());

        let mut members = Vec::new();
        for (name, content) in [("a.jpg", b"aaaa"), ("b.jpg", b"bbbb")] {
            let path = src.join(name);
            fs::write(&path, content).unwrap();
            let stamp = SourceStamp::from_metadata(&fs::metadata(&path).unwrap());
            let mut record = FileRecord::new(path.clone(), stamp, MediaKind::Image);
            record.hash = Some(blake3::hash(content).to_hex().to_string());
            record.size = 4;
            record.captured_at = Some(Utc.with_ymd_and_hms(2022, 8, 1, 10, 0, 0).unwrap());
            record.category = Some(Category::Burst);
            record.group_id = Some("burst-1".to_string());
            record.state = RecordState::Organized;
            manifest.upsert(record);
            members.push(path);
        }

        let mut group = Group::new("burst-1".to_string(), Category::Burst, members.clone());
        group.recommended = Some(members[1].clone());
        manifest.insert_group(group);

        Fixture {
            _temp: temp,
            dst,
            manifest,
        }
    }

    #[test]
    fn decisions_parse_from_cli_text() {
        assert_eq!(
            "keep-recommended".parse::<ReviewDecision>().unwrap(),
            ReviewDecision::KeepRecommended
        );
        assert_eq!("KEEP_ALL".parse::<ReviewDecision>().unwrap(), ReviewDecision::KeepAll);
        assert!("delete".parse::<ReviewDecision>().is_err());
    }

    #[test]
    fn keep_recommended_copies_only_the_keeper() {
        let mut f = fixture();
        let applied =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepRecommended)
                .unwrap();

        assert_eq!(applied.placed, vec![f.dst.join("Organized/2022/08/b.jpg")]);
        assert_eq!(fs::read(&applied.placed[0]).unwrap(), b"bbbb");
        assert!(f.manifest.decision_for("burst-1").is_some());
        assert!(pending_groups(&f.manifest).is_empty());
    }

    #[test]
    fn kept_member_brings_its_sidecar() {
        let mut f = fixture();
        let keeper = f.manifest.group("burst-1").unwrap().recommended.clone().unwrap();
        let sidecar = keeper.with_file_name("b.jpg.json");
        fs::write(&sidecar, br#"{"title":"b"}"#).unwrap();
        f.manifest.record_mut(&keeper).unwrap().sidecar = Some(sidecar.clone());

        apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepRecommended)
            .unwrap();

        let placed = f.dst.join("Organized/2022/08/b.jpg.json");
        assert_eq!(fs::read(&placed).unwrap(), br#"{"title":"b"}"#);
        assert!(sidecar.exists());
    }

    #[test]
    fn keep_all_copies_every_member() {
        let mut f = fixture();
        let applied =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepAll).unwrap();
        assert_eq!(applied.placed.len(), 2);
        assert!(applied.placed.iter().all(|p| p.exists()));
    }

    #[test]
    fn same_decision_twice_is_a_no_op() {
        let mut f = fixture();
        let first =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepAll).unwrap();
        let second =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepAll).unwrap();

        assert_eq!(first, second);
        assert_eq!(f.manifest.decisions().len(), 1);
        let files = fs::read_dir(f.dst.join("Organized/2022/08")).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn conflicting_decision_is_rejected() {
        let mut f = fixture();
        apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::Dismiss).unwrap();
        let error =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::KeepAll)
                .unwrap_err();
        assert!(matches!(
            error,
            TriageError::Organize(OrganizeError::ConflictingDecision { .. })
        ));
    }

    #[test]
    fn dismiss_places_nothing_and_deletes_nothing() {
        let mut f = fixture();
        let applied =
            apply_review_decision(&mut f.manifest, &f.dst, "burst-1", ReviewDecision::Dismiss).unwrap();
        assert!(applied.placed.is_empty());
        for record in f.manifest.records() {
            assert!(record.path.exists());
        }
    }

    #[test]
    fn unknown_group_is_an_error() {
        let mut f = fixture();
        let error =
            apply_review_decision(&mut f.manifest, &f.dst, "nope", ReviewDecision::KeepAll).unwrap_err();
        assert!(matches!(
            error,
            TriageError::Organize(OrganizeError::UnknownGroup { .. })
        ));
    }
}
