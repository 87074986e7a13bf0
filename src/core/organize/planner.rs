//! Destination planning.
//!
//! Output layout under the destination root:
//!
//! ```text
//! Organized/<year>/<MM>/...            accepted singles
//! Review/Duplicates/<group>/...        duplicate clusters
//! Review/Bursts/<group>/...            burst clusters
//! Review/TooSmall/...  Review/Blurry/...  Review/Corrupted/...
//! ```
//!
//! Collisions get `_<hash8>` appended to the stem, then `_<hash8>_<n>`.
//! A name is never reused within a plan or across records already in the
//! manifest, and an existing file is only ever adopted when it is
//! byte-identical to the record.

use super::types::*;
use crate::core::fingerprint;
use crate::core::manifest::ProcessingManifest;
use crate::core::record::{Category, FileRecord, Group, RecordState};
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Root folder for accepted files
pub const ORGANIZED_DIR: &str = "Organized";
/// Root folder for everything awaiting review
pub const REVIEW_DIR: &str = "Review";
/// Marker prepended to the recommended member of a cluster
pub const RECOMMENDED_PREFIX: &str = "RECOMMENDED_";
/// Folder for accepted files without any capture time
pub const UNDATED_DIR: &str = "Undated";

/// `Organized/<year>/<MM>`
pub fn accepted_folder(root: &Path, captured_at: Option<DateTime<Utc>>) -> PathBuf {
    let base = root.join(ORGANIZED_DIR);
    match captured_at {
        Some(at) => base
            .join(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month())),
        None => base.join(UNDATED_DIR),
    }
}

/// `Review/<Category>[/<group>]`
pub fn review_folder(root: &Path, category: Category, group_id: &str) -> PathBuf {
    let base = root.join(REVIEW_DIR).join(category.review_folder());
    if category.has_group_folders() {
        base.join(group_id)
    } else {
        base
    }
}

/// Plans where records go
pub struct OrganizePlanner {
    destination_root: PathBuf,
    reserved: HashSet<PathBuf>,
}

impl OrganizePlanner {
    /// Reserve every destination already claimed in the manifest
    pub fn new(destination_root: &Path, manifest: &ProcessingManifest) -> Self {
        let reserved = manifest
            .records()
            .filter_map(|r| r.destination.clone())
            .collect();
        Self {
            destination_root: destination_root.to_path_buf(),
            reserved,
        }
    }

    /// Plan every resolved record, in path order
    pub fn plan(&mut self, manifest: &ProcessingManifest) -> OrganizePlan {
        let mut plan = OrganizePlan::default();

        // BTreeMap iteration is already path-ordered
        for record in manifest
            .records()
            .filter(|r| r.state == RecordState::Resolved)
        {
            let group = record.group_id.as_deref().and_then(|id| manifest.group(id));
            let placement = self.plan_record(record, group);
            plan.conflict_count += placement.renamed as usize;
            plan.total_size_bytes += placement.size;
            plan.placements.push(placement);
        }

        plan
    }

    /// Destination folder and file name for a record
    pub fn target(&self, record: &FileRecord, group: Option<&Group>) -> (PathBuf, String) {
        let name = record.file_name();
        match (record.category, group) {
            (Some(category), Some(group)) => {
                let folder = review_folder(&self.destination_root, category, &group.id);
                let name = if group.is_recommended(&record.path) {
                    format!("{}{}", RECOMMENDED_PREFIX, name)
                } else {
                    name
                };
                (folder, name)
            }
            _ => (
                accepted_folder(&self.destination_root, record.captured_at),
                name,
            ),
        }
    }

    /// Plan one record into its category folder
    pub fn plan_record(&mut self, record: &FileRecord, group: Option<&Group>) -> PlannedPlacement {
        let (folder, name) = self.target(record, group);
        self.place(record, &folder, &name)
    }

    /// Plan one record into the date tree regardless of its category
    pub fn plan_accepted(&mut self, record: &FileRecord) -> PlannedPlacement {
        let folder = accepted_folder(&self.destination_root, record.captured_at);
        let name = record.file_name();
        self.place(record, &folder, &name)
    }

    fn place(&mut self, record: &FileRecord, folder: &Path, name: &str) -> PlannedPlacement {
        let identity = record.identity();
        let suffix = identity.get(..8).unwrap_or(&identity);

        let mut renamed = false;
        let mut attempt = 0usize;
        let (destination, adopt) = loop {
            let candidate = folder.join(candidate_name(name, suffix, attempt));
            attempt += 1;

            if self.reserved.contains(&candidate) {
                renamed = true;
                continue;
            }
            if candidate.symlink_metadata().is_err() {
                break (candidate, false);
            }
            if same_content(&candidate, record) {
                break (candidate, true);
            }
            renamed = true;
        };

        self.reserved.insert(destination.clone());

        PlannedPlacement {
            source: record.path.clone(),
            destination,
            sidecar: record.sidecar.clone(),
            hash: record.hash.clone(),
            size: record.size,
            adopt,
            renamed,
        }
    }
}

/// `name`, then `stem_<hash8>.ext`, then `stem_<hash8>_<n>.ext`
fn candidate_name(name: &str, suffix: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let tail = if attempt == 1 {
        suffix.to_string()
    } else {
        format!("{}_{}", suffix, attempt)
    };

    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tail, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tail),
    }
}

/// Whether `existing` holds exactly the record's bytes
fn same_content(existing: &Path, record: &FileRecord) -> bool {
    let Ok(metadata) = fs::metadata(existing) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() != record.size {
        return false;
    }
    if record.size == 0 {
        return true;
    }

    let expected = match &record.hash {
        Some(hash) => hash.clone(),
        None => match fingerprint::hash_file(&record.path) {
            Ok(fp) => fp.hash,
            Err(_) => return false,
        },
    };
    fingerprint::hash_file(existing)
        .map(|fp| fp.hash == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{MediaKind, SourceStamp};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(dir: &Path, name: &str, content: &[u8]) -> FileRecord {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let stamp = SourceStamp::from_metadata(&fs::metadata(&path).unwrap());
        let mut record = FileRecord::new(path, stamp, MediaKind::Image);
        record.hash = Some(blake3::hash(content).to_hex().to_string());
        record.size = content.len() as u64;
        record.captured_at = Some(Utc.with_ymd_and_hms(2021, 3, 9, 8, 0, 0).unwrap());
        record.state = RecordState::Resolved;
        record
    }

    fn empty_manifest(root: &Path) -> ProcessingManifest {
        ProcessingManifest::new(root.join("src"), root.join("dst"))
    }

    #[test]
    fn accepted_files_go_to_year_and_month() {
        let root = Path::new("/dst");
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(
            accepted_folder(root, Some(at)),
            PathBuf::from("/dst/Organized/2024/01")
        );
        assert_eq!(
            accepted_folder(root, None),
            PathBuf::from("/dst/Organized/Undated")
        );
    }

    #[test]
    fn review_folders_per_category() {
        let root = Path::new("/dst");
        assert_eq!(
            review_folder(root, Category::Duplicate, "dup-1"),
            PathBuf::from("/dst/Review/Duplicates/dup-1")
        );
        assert_eq!(
            review_folder(root, Category::Blurry, "blurry-1"),
            PathBuf::from("/dst/Review/Blurry")
        );
    }

    #[test]
    fn candidate_names_use_hash_then_counter() {
        assert_eq!(candidate_name("IMG_1.jpg", "abcd1234", 0), "IMG_1.jpg");
        assert_eq!(candidate_name("IMG_1.jpg", "abcd1234", 1), "IMG_1_abcd1234.jpg");
        assert_eq!(candidate_name("IMG_1.jpg", "abcd1234", 2), "IMG_1_abcd1234_2.jpg");
        assert_eq!(candidate_name("README", "abcd1234", 1), "README_abcd1234");
    }

    #[test]
    fn recommended_member_is_prefixed() {
        let temp = TempDir::new().unwrap();
        let manifest = empty_manifest(temp.path());
        let a = record(&temp.path().join("src"), "a.jpg", b"same");
        let mut group = Group::new(
            "dup-1".to_string(),
            Category::Duplicate,
            vec![a.path.clone()],
        );
        group.recommended = Some(a.path.clone());
        let mut a = a;
        a.category = Some(Category::Duplicate);

        let mut planner = OrganizePlanner::new(&temp.path().join("dst"), &manifest);
        let placement = planner.plan_record(&a, Some(&group));
        assert_eq!(
            placement.destination,
            temp.path()
                .join("dst/Review/Duplicates/dup-1/RECOMMENDED_a.jpg")
        );
    }

    #[test]
    fn same_name_in_one_plan_is_disambiguated() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let mut manifest = empty_manifest(temp.path());
        manifest.upsert(record(&src, "x/IMG_1.jpg", b"first"));
        manifest.upsert(record(&src, "y/IMG_1.jpg", b"second"));

        let mut planner = OrganizePlanner::new(&temp.path().join("dst"), &manifest);
        let plan = planner.plan(&manifest);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.conflict_count, 1);
        assert_ne!(plan.placements[0].destination, plan.placements[1].destination);
        let renamed = plan.placements[1].destination.file_name().unwrap().to_string_lossy().into_owned();
        assert!(renamed.starts_with("IMG_1_") && renamed.ends_with(".jpg"));
    }

    #[test]
    fn identical_existing_file_is_adopted() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        let a = record(&src, "a.jpg", b"content");
        let manifest = empty_manifest(temp.path());

        let existing = accepted_folder(&dst, a.captured_at).join("a.jpg");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"content").unwrap();

        let placement = OrganizePlanner::new(&dst, &manifest).plan_record(&a, None);
        assert!(placement.adopt);
        assert_eq!(placement.destination, existing);
    }

    #[test]
    fn different_existing_file_is_never_overwritten() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        let a = record(&src, "a.jpg", b"content");
        let manifest = empty_manifest(temp.path());

        let existing = accepted_folder(&dst, a.captured_at).join("a.jpg");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"someone else").unwrap();

        let placement = OrganizePlanner::new(&dst, &manifest).plan_record(&a, None);
        assert!(!placement.adopt);
        assert!(placement.renamed);
        assert_ne!(placement.destination, existing);
    }

    #[test]
    fn destinations_in_manifest_are_reserved() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        let mut manifest = empty_manifest(temp.path());

        let mut done = record(&src, "old/a.jpg", b"old");
        let taken = accepted_folder(&dst, done.captured_at).join("a.jpg");
        done.destination = Some(taken.clone());
        done.state = RecordState::Organized;
        manifest.upsert(done);

        let fresh = record(&src, "new/a.jpg", b"new");
        let placement = OrganizePlanner::new(&dst, &manifest).plan_record(&fresh, None);
        assert_ne!(placement.destination, taken);
    }
}
