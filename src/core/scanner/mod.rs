//! # Scanner Module
//!
//! Discovers media files under the source root.
//!
//! The scan is a lazy iterator over the directory tree: the pipeline pulls
//! candidates into a bounded queue, so walking never runs far ahead of
//! hashing. Paths already organized (with an unchanged size and mtime) are
//! skipped, unreadable directories become warnings, and unknown extensions
//! are ignored.
//!
//! ## Example
//! ```rust,ignore
//! use photo_triage::core::scanner::{FinalizedPaths, ScanConfig, WalkDirScanner};
//!
//! let scanner = WalkDirScanner::new(ScanConfig::from_triage_config(&config));
//! let finalized = FinalizedPaths::from_manifest(&manifest);
//! for candidate in scanner.candidates(&config.source_root, &finalized, None)? {
//!     println!("{}", candidate.path.display());
//! }
//! ```

mod filter;
mod walker;

pub use filter::{is_hidden, MediaFilter};
pub use walker::{Candidates, ScanConfig, WalkDirScanner};

use crate::core::manifest::ProcessingManifest;
use crate::core::record::{MediaKind, SourceStamp};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A discovered media file
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub path: PathBuf,
    pub stamp: SourceStamp,
    pub media_kind: MediaKind,
}

/// Counts collected while walking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub candidates: usize,
    pub skipped_finalized: usize,
    pub warnings: usize,
    /// Total size of yielded candidates
    pub bytes: u64,
}

/// Paths the organizer already finished, with the stamp they had then.
///
/// A snapshot taken before scanning, so the walk never reads the manifest
/// while the writer is updating it.
#[derive(Debug, Clone, Default)]
pub struct FinalizedPaths {
    stamps: HashMap<PathBuf, SourceStamp>,
}

impl FinalizedPaths {
    pub fn from_manifest(manifest: &ProcessingManifest) -> Self {
        Self {
            stamps: manifest
                .records()
                .filter(|r| r.is_organized())
                .map(|r| (r.path.clone(), r.stamp))
                .collect(),
        }
    }

    pub fn insert(&mut self, path: PathBuf, stamp: SourceStamp) {
        self.stamps.insert(path, stamp);
    }

    /// Finalized and unchanged since
    pub fn contains(&self, path: &Path, stamp: &SourceStamp) -> bool {
        self.stamps.get(path) == Some(stamp)
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
