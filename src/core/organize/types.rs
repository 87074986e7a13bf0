//! Types for the organize module.

use crate::core::record::FailureReason;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operation mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Copy files to the destination (originals untouched)
    #[default]
    Copy,
    /// Move files to the destination
    Move,
}

/// Where one record will be materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPlacement {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Sidecar travelling with the file
    pub sidecar: Option<PathBuf>,
    pub hash: Option<String>,
    pub size: u64,
    /// A byte-identical file already sits at `destination`
    pub adopt: bool,
    /// The name was changed to avoid a collision
    pub renamed: bool,
}

impl PlannedPlacement {
    /// Destination of the sidecar: `<destination file name>.json`
    pub fn sidecar_destination(&self) -> Option<PathBuf> {
        self.sidecar.as_ref()?;
        let name = self.destination.file_name()?.to_string_lossy().into_owned();
        Some(self.destination.with_file_name(format!("{}.json", name)))
    }
}

/// Everything the organizer will do in one pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizePlan {
    pub placements: Vec<PlannedPlacement>,
    pub conflict_count: usize,
    pub total_size_bytes: u64,
}

impl OrganizePlan {
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Result of one placement
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    /// Copied or moved into place
    Placed { destination: PathBuf, bytes: u64 },
    /// An identical file was already there
    Adopted { destination: PathBuf },
    /// Not attempted because the run is stopping
    Skipped,
    Failed {
        reason: FailureReason,
        detail: String,
    },
}

impl PlacementOutcome {
    pub fn destination(&self) -> Option<&PathBuf> {
        match self {
            PlacementOutcome::Placed { destination, .. }
            | PlacementOutcome::Adopted { destination } => Some(destination),
            _ => None,
        }
    }

    pub fn is_disk_full(&self) -> bool {
        matches!(
            self,
            PlacementOutcome::Failed {
                reason: FailureReason::DiskFull,
                ..
            }
        )
    }
}

/// Aggregate of an organize pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizeResult {
    pub placed: usize,
    pub adopted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_written: u64,
    pub disk_full: bool,
    pub duration_ms: u64,
}

impl OrganizeResult {
    pub fn tally(outcomes: &[(PathBuf, PlacementOutcome)], duration_ms: u64) -> Self {
        let mut result = OrganizeResult {
            duration_ms,
            ..Default::default()
        };
        for (_, outcome) in outcomes {
            match outcome {
                PlacementOutcome::Placed { bytes, .. } => {
                    result.placed += 1;
                    result.bytes_written += bytes;
                }
                PlacementOutcome::Adopted { .. } => result.adopted += 1,
                PlacementOutcome::Skipped => result.skipped += 1,
                PlacementOutcome::Failed { reason, .. } => {
                    result.failed += 1;
                    result.disk_full |= *reason == FailureReason::DiskFull;
                }
            }
        }
        result
    }
}
