//! Event type definitions for progress reporting.

use crate::core::progress::RunState;
use crate::core::record::{Category, FailureReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// All events emitted by the triage pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Run-level lifecycle
    Run(RunEvent),
    /// A stage started or finished
    Stage(StageEvent),
    /// Throttled progress snapshot
    Progress(ProgressEvent),
    /// Recoverable scanning problems
    Scan(ScanEvent),
    /// Per-record outcomes worth surfacing
    Record(RecordEvent),
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scanning,
    Fingerprinting,
    Assessing,
    Grouping,
    Selecting,
    Organizing,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Scanning,
        Stage::Fingerprinting,
        Stage::Assessing,
        Stage::Grouping,
        Stage::Selecting,
        Stage::Organizing,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Scanning => write!(f, "Scanning"),
            Stage::Fingerprinting => write!(f, "Fingerprinting"),
            Stage::Assessing => write!(f, "Assessing quality"),
            Stage::Grouping => write!(f, "Grouping"),
            Stage::Selecting => write!(f, "Selecting"),
            Stage::Organizing => write!(f, "Organizing"),
        }
    }
}

/// Run-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    Started { run_id: String },
    StateChanged { state: RunState },
    Completed { summary: RunSummary },
    Cancelled { summary: RunSummary },
    /// The run stopped early but can be resumed (e.g. disk full)
    Paused { message: String },
    Error { message: String },
}

/// Stage boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageEvent {
    Started { stage: Stage },
    Completed { stage: Stage, files: usize },
}

/// Progress snapshot delivered at a bounded rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub files_done: usize,
    pub files_total: usize,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub percent_complete: f64,
    /// `None` until enough items have completed to estimate throughput
    pub eta_seconds: Option<f64>,
}

/// Scanning events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// A directory or file could not be read; scanning continues
    Warning { path: PathBuf, message: String },
    Completed {
        candidates: usize,
        skipped_finalized: usize,
    },
}

/// Per-record events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordEvent {
    Failed {
        path: PathBuf,
        reason: FailureReason,
        detail: String,
    },
    /// The manifest already held a valid hash for this file
    CacheHit { path: PathBuf },
}

/// Completion summary of one run.
///
/// Every file is accounted for: it is either organized or counted under a
/// failure reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunState,
    /// Records known to the manifest
    pub total_records: usize,
    /// Paths handed to the fingerprinter this run
    pub candidates: usize,
    /// Paths skipped because they were already organized
    pub skipped_finalized: usize,
    /// Hashes computed this run
    pub hashed: usize,
    /// Hashes reused from the manifest
    pub cache_hits: usize,
    /// Files placed by the organizer this run
    pub organized: usize,
    /// Files in the date-partitioned tree (all runs)
    pub accepted: usize,
    /// Groups per category
    pub groups: BTreeMap<Category, usize>,
    /// Files per category
    pub files_by_category: BTreeMap<Category, usize>,
    /// Files per failure reason
    pub failures: BTreeMap<FailureReason, usize>,
    pub bytes_processed: u64,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn group_count(&self) -> usize {
        self.groups.values().sum()
    }
}
