//! Single-writer access to the manifest.
//!
//! Workers never touch the manifest. They hand finished records to the
//! writer over a channel; the writer applies them in arrival order and
//! flushes every `flush_every` records, so a crash loses at most the last
//! unflushed batch.

use super::{ManifestStore, ProcessingManifest};
use crate::core::record::FileRecord;
use crate::error::ManifestError;

/// Owns mutation of the manifest for the duration of a stage
pub struct ManifestWriter<'a> {
    manifest: &'a mut ProcessingManifest,
    store: &'a ManifestStore,
    flush_every: usize,
    unflushed: usize,
    flushes: usize,
}

impl<'a> ManifestWriter<'a> {
    pub fn new(
        manifest: &'a mut ProcessingManifest,
        store: &'a ManifestStore,
        flush_every: usize,
    ) -> Self {
        Self {
            manifest,
            store,
            flush_every: flush_every.max(1),
            unflushed: 0,
            flushes: 0,
        }
    }

    /// Apply one record update, flushing when the batch is full
    pub fn apply(&mut self, record: FileRecord) -> Result<(), ManifestError> {
        self.manifest.upsert(record);
        self.unflushed += 1;

        if self.unflushed >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Apply without flushing (used after a flush has already failed)
    pub fn apply_unflushed(&mut self, record: FileRecord) {
        self.manifest.upsert(record);
        self.unflushed += 1;
    }

    pub fn flush(&mut self) -> Result<(), ManifestError> {
        self.store.save(&mut *self.manifest)?;
        self.unflushed = 0;
        self.flushes += 1;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.unflushed
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn manifest(&self) -> &ProcessingManifest {
        &*self.manifest
    }
}
