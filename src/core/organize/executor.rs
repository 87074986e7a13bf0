//! Plan execution.
//!
//! Placements are independent, so they run on a small rayon pool. Copies
//! are written to a temp file in the destination directory and published
//! with a no-clobber rename: a crash leaves either nothing or a complete
//! file, and an existing file is never replaced.

use super::types::*;
use crate::core::progress::ProgressController;
use crate::core::record::FailureReason;
use crate::events::Stage;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Writes one file to its destination without replacing anything there,
/// returning the bytes written
pub type TransferFn = Arc<dyn Fn(&Path, &Path) -> io::Result<u64> + Send + Sync>;

/// The transfer matching an operation mode
pub fn transfer_for(mode: OperationMode) -> TransferFn {
    match mode {
        OperationMode::Copy => Arc::new(copy_no_clobber) as TransferFn,
        OperationMode::Move => Arc::new(move_no_clobber) as TransferFn,
    }
}

/// Executes organize plans
pub struct OrganizeExecutor {
    mode: OperationMode,
    transfer: TransferFn,
    pool: Option<rayon::ThreadPool>,
}

impl OrganizeExecutor {
    pub fn new(mode: OperationMode, threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("organize-{}", i))
            .build();
        let pool = match pool {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!("organize pool unavailable, placing files sequentially: {}", e);
                None
            }
        };
        Self {
            mode,
            transfer: transfer_for(mode),
            pool,
        }
    }

    /// Replace how files are written (e.g. to a staging area or a fake volume)
    pub fn with_transfer(mut self, transfer: TransferFn) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    /// Execute every placement of the plan.
    ///
    /// Stops starting new placements once cancellation is requested or the
    /// destination volume reports it is full; placements already running
    /// finish first. Outcomes come back in plan order.
    pub fn execute(
        &self,
        plan: &OrganizePlan,
        progress: &ProgressController,
    ) -> Vec<(PathBuf, PlacementOutcome)> {
        let halted = AtomicBool::new(false);

        let run_one = |placement: &PlannedPlacement| {
            if halted.load(Ordering::SeqCst) || progress.should_stop() {
                return (placement.source.clone(), PlacementOutcome::Skipped);
            }

            let outcome = self.place(placement);
            if outcome.is_disk_full() {
                tracing::warn!(path = %placement.destination.display(), "destination volume is full");
                halted.store(true, Ordering::SeqCst);
            }
            progress.complete_item(Stage::Organizing, placement.size);
            (placement.source.clone(), outcome)
        };

        match &self.pool {
            Some(pool) => pool.install(|| plan.placements.par_iter().map(run_one).collect()),
            None => plan.placements.iter().map(run_one).collect(),
        }
    }

    /// Materialize one placement
    pub fn place(&self, placement: &PlannedPlacement) -> PlacementOutcome {
        if placement.adopt {
            tracing::debug!(path = %placement.destination.display(), "adopting identical file");
            self.place_sidecar(placement);
            return PlacementOutcome::Adopted {
                destination: placement.destination.clone(),
            };
        }

        match (self.transfer)(&placement.source, &placement.destination) {
            Ok(bytes) => {
                self.place_sidecar(placement);
                PlacementOutcome::Placed {
                    destination: placement.destination.clone(),
                    bytes,
                }
            }
            Err(e) => {
                let reason = FailureReason::from_io(&e);
                tracing::warn!(
                    source = %placement.source.display(),
                    destination = %placement.destination.display(),
                    %reason,
                    "placement failed: {}",
                    e
                );
                PlacementOutcome::Failed {
                    reason,
                    detail: format!("{}: {}", placement.destination.display(), e),
                }
            }
        }
    }

    /// Sidecars are best effort; the media file is what matters
    fn place_sidecar(&self, placement: &PlannedPlacement) {
        let (Some(source), Some(destination)) =
            (placement.sidecar.as_ref(), placement.sidecar_destination())
        else {
            return;
        };
        if destination.exists() || !source.exists() {
            return;
        }

        if let Err(e) = (self.transfer)(source, &destination) {
            tracing::warn!(path = %source.display(), "sidecar not placed: {}", e);
        }
    }
}

/// Copy through a temp file in the destination directory, then publish
/// without replacing anything already there
pub fn copy_no_clobber(source: &Path, destination: &Path) -> io::Result<u64> {
    let parent = destination
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut reader = BufReader::new(File::open(source)?);
    let temp = NamedTempFile::new_in(parent)?;
    let bytes = {
        let mut writer = BufWriter::new(temp.as_file());
        let bytes = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        bytes
    };
    temp.as_file().sync_all()?;

    let expected = fs::metadata(source)?.len();
    if bytes != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("copied {} of {} bytes", bytes, expected),
        ));
    }

    temp.persist_noclobber(destination).map_err(|e| e.error)?;
    Ok(bytes)
}

/// Rename into place; across filesystems fall back to a verified copy
/// followed by removing the source
pub fn move_no_clobber(source: &Path, destination: &Path) -> io::Result<u64> {
    if destination.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let size = fs::metadata(source)?.len();
    match fs::rename(source, destination) {
        Ok(()) => Ok(size),
        Err(rename_error) => {
            tracing::debug!("rename failed ({}), copying instead", rename_error);
            let bytes = copy_no_clobber(source, destination)?;
            let copied = fs::metadata(destination)?.len();
            if copied != size {
                let _ = fs::remove_file(destination);
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "copy verification failed: source {} bytes, destination {} bytes",
                        size, copied
                    ),
                ));
            }
            fs::remove_file(source)?;
            Ok(bytes)
        }
    }
}
