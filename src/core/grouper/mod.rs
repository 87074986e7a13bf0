//! # Grouper Module
//!
//! Partitions the records pending in this run into groups.
//!
//! Records settled by earlier runs are never regrouped, but a pending copy
//! of settled content joins it as a duplicate: the settled file stays where
//! it was placed and the new copy goes to review.
//!
//! ## Categories, highest precedence first
//! 1. `Corrupted` - failed fingerprinting or decoding
//! 2. `Duplicate` - identical content hash, at least two members
//! 3. `Burst` - consecutive captures no further apart than the burst window
//! 4. `TooSmall` / `Blurry` - quality flags, one singleton group per file
//!
//! Everything else is an accepted single and gets no group.
//!
//! The grouper only sees the complete, stable record set (it runs after the
//! parallel stages have drained), and it orders its inputs by path and
//! timestamp, so the result never depends on worker scheduling.

use crate::config::TriageConfig;
use crate::core::manifest::ProcessingManifest;
use crate::core::record::{
    Category, FailureReason, FileRecord, Group, QualityFlag, RecordState, TimestampSource,
};
use crate::core::selector::select_best;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Groups and accepted singles produced from one pending set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingPlan {
    /// New groups made of pending records only
    pub groups: Vec<Group>,
    /// Duplicate groups that pending copies joined, with every member
    pub joined: Vec<Group>,
    pub accepted: Vec<PathBuf>,
}

impl GroupingPlan {
    pub fn count(&self, category: Category) -> usize {
        self.groups.iter().filter(|g| g.category == category).count()
    }
}

/// Whether a record still needs grouping
pub fn is_pending(record: &FileRecord) -> bool {
    match record.state {
        RecordState::Scored => true,
        RecordState::Failed => {
            record.failure == Some(FailureReason::Corrupted) && record.group_id.is_none()
        }
        _ => false,
    }
}

/// Whether a record was grouped by an earlier run and can anchor a duplicate
fn is_settled(record: &FileRecord) -> bool {
    matches!(
        record.state,
        RecordState::Grouped | RecordState::Resolved | RecordState::Organized
    ) && record.hash.is_some()
        && !record.is_corrupted()
        && matches!(record.category, None | Some(Category::Duplicate))
}

/// Copies of one content settled by earlier runs
#[derive(Debug, Clone, PartialEq)]
struct Settled {
    /// The duplicate group already holding them, if any
    group: Option<Group>,
    members: Vec<PathBuf>,
    keeper: Option<PathBuf>,
}

impl Settled {
    /// The group after `arrivals` join it
    fn join(&self, ids: &mut IdAllocator, hash: &str, arrivals: &[&FileRecord]) -> Group {
        if let Some(existing) = &self.group {
            let mut group = existing.clone();
            for record in arrivals {
                if !group.contains(&record.path) {
                    group.members.push(record.path.clone());
                }
            }
            return group;
        }

        let id = ids.allocate(format!("{}-{}", Category::Duplicate.id_prefix(), short(hash, 12)));
        let mut members = self.members.clone();
        members.extend(arrivals.iter().map(|r| r.path.clone()));
        members.sort();
        let mut group = Group::new(id, Category::Duplicate, members);
        group.recommended = self.keeper.clone();
        group
    }
}

/// Settled content indexed by `(hash, size)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettledCopies {
    by_content: BTreeMap<(String, u64), Settled>,
}

impl SettledCopies {
    pub fn from_manifest(manifest: &ProcessingManifest) -> Self {
        let mut found: BTreeMap<(String, u64), Vec<&FileRecord>> = BTreeMap::new();
        for record in manifest.records().filter(|r| is_settled(r)) {
            if let Some(hash) = &record.hash {
                found.entry((hash.clone(), record.size)).or_default().push(record);
            }
        }

        let by_content = found
            .into_iter()
            .map(|(content, records)| {
                let group = records
                    .iter()
                    .find_map(|r| r.group_id.as_deref())
                    .and_then(|id| manifest.group(id))
                    .filter(|g| g.category == Category::Duplicate)
                    .cloned();
                let settled = Settled {
                    group,
                    members: records.iter().map(|r| r.path.clone()).collect(),
                    keeper: select_best(&records).map(|r| r.path.clone()),
                };
                (content, settled)
            })
            .collect();
        Self { by_content }
    }

    pub fn len(&self) -> usize {
        self.by_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_content.is_empty()
    }

    fn get(&self, hash: &str, size: u64) -> Option<&Settled> {
        self.by_content.get(&(hash.to_string(), size))
    }
}

/// Batch grouping of scored records
#[derive(Debug, Clone)]
pub struct Grouper {
    burst_window_seconds: f64,
    use_filesystem_time: bool,
}

impl Grouper {
    pub fn new(burst_window_seconds: f64, use_filesystem_time: bool) -> Self {
        Self {
            burst_window_seconds,
            use_filesystem_time,
        }
    }

    pub fn from_config(config: &TriageConfig) -> Self {
        Self::new(config.burst_window_seconds, config.burst_use_filesystem_time)
    }

    /// Group every pending record in the manifest and write the result back.
    ///
    /// Groups persisted by an earlier run are left alone.
    pub fn group_manifest(&self, manifest: &mut ProcessingManifest) -> GroupingPlan {
        let taken: HashSet<String> = manifest.groups().map(|g| g.id.clone()).collect();
        let settled = SettledCopies::from_manifest(manifest);
        let plan = {
            let pending: Vec<&FileRecord> = manifest.records().filter(|r| is_pending(r)).collect();
            self.plan_with(&pending, &settled, &taken)
        };
        apply_plan(&plan, manifest);

        tracing::info!(
            duplicates = plan.count(Category::Duplicate),
            joined = plan.joined.len(),
            bursts = plan.count(Category::Burst),
            flagged = plan.count(Category::TooSmall) + plan.count(Category::Blurry),
            corrupted = plan.count(Category::Corrupted),
            accepted = plan.accepted.len(),
            "grouping complete"
        );
        plan
    }

    /// Partition `records`. Ids in `taken` are never reused.
    pub fn plan(&self, records: &[&FileRecord], taken: &HashSet<String>) -> GroupingPlan {
        self.plan_with(records, &SettledCopies::default(), taken)
    }

    /// Partition `records`, letting copies of `settled` content join it
    pub fn plan_with(
        &self,
        records: &[&FileRecord],
        settled: &SettledCopies,
        taken: &HashSet<String>,
    ) -> GroupingPlan {
        let mut ids = IdAllocator::new(taken);
        let mut plan = GroupingPlan::default();

        let mut ordered: Vec<&FileRecord> = records.to_vec();
        ordered.sort_by(|a, b| a.path.cmp(&b.path));

        let (corrupted, healthy): (Vec<&FileRecord>, Vec<&FileRecord>) =
            ordered.into_iter().partition(|r| r.is_corrupted());

        // Duplicates: identical content hash and size
        let mut arriving: BTreeMap<(&str, u64), Vec<&FileRecord>> = BTreeMap::new();
        let mut by_content: BTreeMap<(&str, u64), Vec<&FileRecord>> = BTreeMap::new();
        let mut unhashed = Vec::new();
        for record in healthy {
            match record.hash.as_deref() {
                Some(hash) if settled.get(hash, record.size).is_some() => {
                    arriving.entry((hash, record.size)).or_default().push(record)
                }
                Some(hash) => by_content.entry((hash, record.size)).or_default().push(record),
                None => unhashed.push(record),
            }
        }

        for ((hash, size), arrivals) in arriving {
            if let Some(copies) = settled.get(hash, size) {
                plan.joined.push(copies.join(&mut ids, hash, &arrivals));
            }
        }

        let mut remaining: Vec<&FileRecord> = unhashed;
        for ((hash, _), members) in by_content {
            if members.len() < 2 {
                remaining.extend(members);
                continue;
            }
            let id = ids.allocate(format!("{}-{}", Category::Duplicate.id_prefix(), short(hash, 12)));
            plan.groups.push(Group::new(
                id,
                Category::Duplicate,
                members.iter().map(|r| r.path.clone()).collect(),
            ));
        }

        // Bursts: time-adjacent captures among the rest
        let (mut timed, untimed): (Vec<&FileRecord>, Vec<&FileRecord>) =
            remaining.into_iter().partition(|r| self.burst_time_usable(r));
        timed.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.path.cmp(&b.path)));

        let mut leftovers: Vec<&FileRecord> = untimed;
        for run in self.split_runs(&timed) {
            if run.len() < 2 {
                leftovers.extend(run);
                continue;
            }
            let first = run[0];
            let stamp = first
                .captured_at
                .map(|t| t.format("%Y%m%d-%H%M%S").to_string())
                .unwrap_or_default();
            let id = ids.allocate(format!(
                "{}-{}-{}",
                Category::Burst.id_prefix(),
                stamp,
                short(&first.identity(), 8)
            ));
            plan.groups.push(Group::new(
                id,
                Category::Burst,
                run.iter().map(|r| r.path.clone()).collect(),
            ));
        }

        // Flags, then accepted singles
        leftovers.sort_by(|a, b| a.path.cmp(&b.path));
        for record in leftovers {
            let category = if record.has_flag(QualityFlag::TooSmall) {
                Category::TooSmall
            } else if record.has_flag(QualityFlag::Blurry) {
                Category::Blurry
            } else {
                plan.accepted.push(record.path.clone());
                continue;
            };
            plan.groups.push(singleton(&mut ids, category, record));
        }

        for record in corrupted {
            plan.groups.push(singleton(&mut ids, Category::Corrupted, record));
        }

        plan
    }

    fn burst_time_usable(&self, record: &FileRecord) -> bool {
        record.captured_at.is_some()
            && (self.use_filesystem_time
                || record.timestamp_source != Some(TimestampSource::Filesystem))
    }

    /// Split time-sorted records wherever the gap exceeds the window
    fn split_runs<'r>(&self, sorted: &[&'r FileRecord]) -> Vec<Vec<&'r FileRecord>> {
        let mut runs: Vec<Vec<&FileRecord>> = Vec::new();
        let mut previous: Option<&FileRecord> = None;

        for &record in sorted {
            let joins = match (previous.and_then(|p| p.captured_at), record.captured_at) {
                (Some(prev), Some(current)) => {
                    let gap = (current - prev).num_milliseconds() as f64 / 1000.0;
                    gap <= self.burst_window_seconds
                }
                _ => false,
            };
            match runs.last_mut() {
                Some(run) if joins => run.push(record),
                _ => runs.push(vec![record]),
            }
            previous = Some(record);
        }
        runs
    }
}

fn singleton(ids: &mut IdAllocator, category: Category, record: &FileRecord) -> Group {
    let id = ids.allocate(format!(
        "{}-{}",
        category.id_prefix(),
        short(&record.identity(), 12)
    ));
    Group::new(id, category, vec![record.path.clone()])
}

fn short(text: &str, len: usize) -> &str {
    text.get(..len).unwrap_or(text)
}

/// Hands out ids, suffixing `-2`, `-3`... when one is already taken
struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    fn new(taken: &HashSet<String>) -> Self {
        Self {
            used: taken.clone(),
        }
    }

    fn allocate(&mut self, base: String) -> String {
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Write group membership onto the records and register the groups
pub fn apply_plan(plan: &GroupingPlan, manifest: &mut ProcessingManifest) {
    for group in &plan.groups {
        for member in &group.members {
            if let Some(record) = manifest.record_mut(member) {
                record.category = Some(group.category);
                record.group_id = Some(group.id.clone());
                record.recommended = false;
                record.state = RecordState::Grouped;
            }
        }
        manifest.insert_group(group.clone());
    }

    for group in &plan.joined {
        for member in &group.members {
            if let Some(record) = manifest.record_mut(member) {
                let arriving = is_pending(record);
                record.category = Some(Category::Duplicate);
                record.group_id = Some(group.id.clone());
                record.recommended = group.is_recommended(member);
                if arriving {
                    record.state = RecordState::Grouped;
                }
            }
        }
        manifest.insert_group(group.clone());
    }

    for path in &plan.accepted {
        if let Some(record) = manifest.record_mut(path) {
            record.category = None;
            record.group_id = None;
            record.recommended = false;
            record.state = RecordState::Grouped;
        }
    }
}
