//! Directory walking implementation using walkdir.

use super::filter::{is_hidden, MediaFilter};
use super::{FinalizedPaths, ScanCandidate, ScanStats};
use crate::config::TriageConfig;
use crate::core::record::{MediaKind, SourceStamp};
use crate::error::ScanError;
use crate::events::{Event, EventSender, ScanEvent};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Configuration for the directory scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Whether to include hidden files and directories
    pub include_hidden: bool,
    /// Extensions to pick up (images and videos)
    pub extensions: Vec<String>,
    /// Extensions classified as video
    pub video_extensions: Vec<String>,
    /// Subtrees never descended into (destination, state directory)
    pub excluded: Vec<PathBuf>,
}

impl ScanConfig {
    pub fn from_triage_config(config: &TriageConfig) -> Self {
        let mut excluded = vec![config.destination_root.clone()];
        if let Some(parent) = config.manifest_path().parent() {
            excluded.push(parent.to_path_buf());
        }

        Self {
            follow_symlinks: config.follow_symlinks,
            include_hidden: config.include_hidden,
            extensions: config.scan_extensions(),
            video_extensions: config.video_extensions.clone(),
            excluded,
        }
    }
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    config: ScanConfig,
    filter: MediaFilter,
    excluded: Vec<PathBuf>,
}

impl WalkDirScanner {
    pub fn new(config: ScanConfig) -> Self {
        let filter = MediaFilter::new(&config.extensions).with_hidden(config.include_hidden);
        // Compare against canonical forms so `out/../out` is still excluded
        let excluded = config
            .excluded
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
            .collect();

        Self {
            config,
            filter,
            excluded,
        }
    }

    /// Lazily walk `root`, yielding every candidate not yet finalized.
    ///
    /// Nothing is read until the iterator is advanced, so a bounded consumer
    /// throttles the walk.
    pub fn candidates<'a>(
        &'a self,
        root: &Path,
        finalized: &'a FinalizedPaths,
        events: Option<&'a EventSender>,
    ) -> Result<Candidates<'a>, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }

        let root = root.to_path_buf();
        let include_hidden = self.config.include_hidden;
        let excluded = self.excluded.clone();

        let entries = WalkDir::new(&root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if !include_hidden && is_hidden(entry.path()) {
                    return false;
                }
                !(entry.file_type().is_dir() && is_excluded(entry.path(), &excluded))
            });

        Ok(Candidates {
            scanner: self,
            entries: Box::new(entries),
            finalized,
            events,
            stats: ScanStats::default(),
        })
    }

    /// Walk the whole tree at once
    pub fn scan(
        &self,
        root: &Path,
        finalized: &FinalizedPaths,
        events: Option<&EventSender>,
    ) -> Result<(Vec<ScanCandidate>, ScanStats), ScanError> {
        let mut candidates = self.candidates(root, finalized, events)?;
        let found: Vec<ScanCandidate> = candidates.by_ref().collect();
        Ok((found, candidates.finish()))
    }

    fn classify(&self, entry: &DirEntry) -> Result<Option<ScanCandidate>, ScanError> {
        if !entry.file_type().is_file() || !self.filter.should_include(entry.path()) {
            return Ok(None);
        }

        let metadata = entry.metadata().map_err(|e| walk_error(e, entry.path()))?;
        let path = entry.path().to_path_buf();
        let media_kind = MediaKind::from_path(&path, &self.config.video_extensions);

        Ok(Some(ScanCandidate {
            stamp: SourceStamp::from_metadata(&metadata),
            path,
            media_kind,
        }))
    }
}

fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    if excluded.iter().any(|e| e == path) {
        return true;
    }
    match path.canonicalize() {
        Ok(canonical) => excluded.iter().any(|e| *e == canonical),
        Err(_) => false,
    }
}

fn walk_error(error: walkdir::Error, fallback: &Path) -> ScanError {
    let path = error
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fallback.to_path_buf());

    match error.io_error().map(|e| e.kind()) {
        Some(std::io::ErrorKind::PermissionDenied) => ScanError::PermissionDenied { path },
        _ => ScanError::ReadDirectory {
            path,
            source: error
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk error")),
        },
    }
}

fn error_path(error: &ScanError) -> PathBuf {
    match error {
        ScanError::DirectoryNotFound { path }
        | ScanError::PermissionDenied { path }
        | ScanError::ReadDirectory { path, .. } => path.clone(),
    }
}

/// Lazy candidate sequence produced by [`WalkDirScanner::candidates`]
pub struct Candidates<'a> {
    scanner: &'a WalkDirScanner,
    entries: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>,
    finalized: &'a FinalizedPaths,
    events: Option<&'a EventSender>,
    stats: ScanStats,
}

impl<'a> Candidates<'a> {
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Stop walking and report what was seen; emits `ScanEvent::Completed`
    pub fn finish(self) -> ScanStats {
        if let Some(sender) = self.events {
            sender.send(Event::Scan(ScanEvent::Completed {
                candidates: self.stats.candidates,
                skipped_finalized: self.stats.skipped_finalized,
            }));
        }
        self.stats
    }

    fn warn(&mut self, error: ScanError) {
        let path = error_path(&error);
        tracing::warn!(path = %path.display(), "{}", error);
        self.stats.warnings += 1;
        if let Some(sender) = self.events {
            sender.send(Event::Scan(ScanEvent::Warning {
                path,
                message: error.to_string(),
            }));
        }
    }
}

impl<'a> Iterator for Candidates<'a> {
    type Item = ScanCandidate;

    fn next(&mut self) -> Option<ScanCandidate> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let fallback = e.path().map(Path::to_path_buf).unwrap_or_default();
                    self.warn(walk_error(e, &fallback));
                    continue;
                }
            };

            match self.scanner.classify(&entry) {
                Ok(Some(candidate)) => {
                    if self.finalized.contains(&candidate.path, &candidate.stamp) {
                        self.stats.skipped_finalized += 1;
                        continue;
                    }
                    self.stats.candidates += 1;
                    self.stats.bytes += candidate.stamp.size;
                    return Some(candidate);
                }
                Ok(None) => continue,
                Err(e) => self.warn(e),
            }
        }
    }
}
