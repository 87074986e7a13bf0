//! # Manifest Module
//!
//! The processing manifest is the only source of resumability: every record,
//! every group and every applied review decision lives here, and it is
//! flushed to disk at stage boundaries and every few hundred records.
//!
//! ## Format
//! Versioned JSON keyed by source path. Unknown fields are ignored on read
//! so a manifest written by a newer release can still be resumed.

mod store;
mod writer;

pub use store::ManifestStore;
pub use writer::ManifestWriter;

use crate::core::record::{Category, FailureReason, FileRecord, Group, RecordState, SourceStamp};
use crate::core::review::AppliedDecision;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// Persisted snapshot of all records, groups and review decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingManifest {
    pub version: u32,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_id: Option<Uuid>,
    #[serde(default)]
    records: BTreeMap<String, FileRecord>,
    #[serde(default)]
    groups: BTreeMap<String, Group>,
    #[serde(default)]
    decisions: Vec<AppliedDecision>,
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl ProcessingManifest {
    pub fn new(source_root: PathBuf, destination_root: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            version: MANIFEST_VERSION,
            source_root,
            destination_root,
            created_at: now,
            updated_at: now,
            last_run_id: None,
            records: BTreeMap::new(),
            groups: BTreeMap::new(),
            decisions: Vec::new(),
        }
    }

    /// Refuse to resume a manifest that was built for a different source tree
    pub fn check_source(&self, manifest_path: &Path, source_root: &Path) -> Result<(), ConfigError> {
        if self.source_root != source_root {
            return Err(ConfigError::ManifestSourceMismatch {
                manifest: manifest_path.to_path_buf(),
                recorded: self.source_root.clone(),
                requested: source_root.to_path_buf(),
            });
        }
        Ok(())
    }

    pub fn record(&self, path: &Path) -> Option<&FileRecord> {
        self.records.get(&key(path))
    }

    pub fn record_mut(&mut self, path: &Path) -> Option<&mut FileRecord> {
        self.records.get_mut(&key(path))
    }

    /// Insert or replace a record.
    ///
    /// A replacement that no longer carries the previous record's group id
    /// (a file that changed on disk) leaves that group.
    pub fn upsert(&mut self, record: FileRecord) {
        let path = record.path.clone();
        let new_group = record.group_id.clone();
        let previous = self.records.insert(key(&path), record);

        if let Some(old_group) = previous.and_then(|p| p.group_id) {
            if new_group.as_deref() != Some(old_group.as_str()) {
                self.leave_group(&old_group, &path);
            }
        }
    }

    /// Remove `path` from a group.
    ///
    /// A cluster left with fewer than two members, or any group left empty,
    /// is dissolved and its remaining members released. A cluster that lost
    /// its keeper keeps its members and waits for a new recommendation.
    pub fn leave_group(&mut self, group_id: &str, path: &Path) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        group.members.retain(|m| m != path);
        if group.is_recommended(path) {
            group.recommended = None;
        }
        let dissolve =
            group.is_empty() || (group.category.requires_recommendation() && group.len() < 2);
        if !dissolve {
            tracing::debug!(group = group_id, path = %path.display(), "left group");
            return;
        }

        let remaining = self
            .groups
            .remove(group_id)
            .map(|g| g.members)
            .unwrap_or_default();
        for member in &remaining {
            if let Some(record) = self.record_mut(member) {
                record.release_from_group();
            }
        }
        tracing::debug!(group = group_id, released = remaining.len(), "group dissolved");
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut FileRecord> {
        self.records.values_mut()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Whether a path is already organized and unchanged on disk
    pub fn is_finalized(&self, path: &Path, stamp: &SourceStamp) -> bool {
        self.record(path)
            .map(|r| r.is_organized() && r.matches_stamp(stamp))
            .unwrap_or(false)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn group_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.groups.get_mut(id)
    }

    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn remove_group(&mut self, id: &str) -> Option<Group> {
        self.groups.remove(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn has_group(&self, id: &str) -> bool {
        self.groups.contains_key(id)
    }

    pub fn decisions(&self) -> &[AppliedDecision] {
        &self.decisions
    }

    pub fn decision_for(&self, group_id: &str) -> Option<&AppliedDecision> {
        self.decisions.iter().find(|d| d.group_id == group_id)
    }

    pub fn push_decision(&mut self, decision: AppliedDecision) {
        self.decisions.push(decision);
    }

    pub fn count_in_state(&self, state: RecordState) -> usize {
        self.records().filter(|r| r.state == state).count()
    }

    /// Records per failure reason
    pub fn failure_counts(&self) -> BTreeMap<FailureReason, usize> {
        let mut counts = BTreeMap::new();
        for reason in self.records().filter_map(|r| r.failure) {
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }

    /// Records per group category
    pub fn category_counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for category in self.records().filter_map(|r| r.category) {
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
