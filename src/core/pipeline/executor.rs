//! Pipeline execution implementation.

use super::ingest::{IngestPlan, PendingRecords};
use crate::config::TriageConfig;
use crate::core::fingerprint::{FingerprintOutcome, Fingerprinter};
use crate::core::grouper::Grouper;
use crate::core::manifest::{ManifestStore, ManifestWriter, ProcessingManifest};
use crate::core::organize::{
    apply_outcome, OperationMode, OrganizeExecutor, OrganizePlanner, OrganizeResult,
    PlacementOutcome, TransferFn, ORGANIZED_DIR,
};
use crate::core::progress::{CancellationToken, ProgressController, RunState};
use crate::core::quality::{AssessOutcome, QualityAssessor};
use crate::core::record::{Category, FileRecord, RecordState};
use crate::core::scanner::{FinalizedPaths, ScanConfig, ScanStats, WalkDirScanner};
use crate::core::selector::resolve_manifest;
use crate::error::{ConfigError, ManifestError, Result, ScanError, TriageError};
use crate::events::{
    null_sender, Event, EventSender, RecordEvent, RunEvent, RunSummary, Stage, StageEvent,
};
use crossbeam_channel::{bounded, unbounded};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use uuid::Uuid;

/// Builder for pipeline configuration
pub struct PipelineBuilder {
    config: TriageConfig,
    cancel: Option<CancellationToken>,
    transfer: Option<TransferFn>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: TriageConfig::default(),
            cancel: None,
            transfer: None,
        }
    }

    /// Start from a complete configuration
    pub fn config(mut self, config: TriageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.source_root = path.into();
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.destination_root = path.into();
        self
    }

    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_path = Some(path.into());
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    pub fn operation(mut self, mode: OperationMode) -> Self {
        self.config.operation = mode;
        self
    }

    pub fn burst_window_seconds(mut self, seconds: f64) -> Self {
        self.config.burst_window_seconds = seconds;
        self
    }

    /// Share a cancel token with the caller
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Replace how the organizer writes files into the destination
    pub fn transfer(mut self, transfer: TransferFn) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
            transfer: self.transfer,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The triage pipeline
pub struct Pipeline {
    config: TriageConfig,
    cancel: CancellationToken,
    transfer: Option<TransferFn>,
}

/// Outcome of the per-file stages
#[derive(Debug, Default)]
struct IngestStats {
    scan: ScanStats,
    hashed: usize,
    cache_hits: usize,
}

#[derive(Default)]
struct IngestCounters {
    hashed: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn new(config: TriageConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Token that cancels this pipeline when triggered from any thread
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline without events
    pub fn run(&self) -> Result<RunSummary> {
        self.run_with_events(&null_sender())
    }

    /// Run the pipeline with event reporting
    pub fn run_with_events(&self, events: &EventSender) -> Result<RunSummary> {
        let progress = ProgressController::new(
            self.cancel.clone(),
            events.clone(),
            self.config.progress_interval(),
            self.config.eta_window,
        );
        self.run_with_controller(&progress)
    }

    /// Run with a caller-owned controller (to observe state or counters)
    pub fn run_with_controller(&self, progress: &ProgressController) -> Result<RunSummary> {
        match self.execute(progress) {
            Ok(summary) => Ok(summary),
            Err(error) => {
                if !matches!(error, TriageError::DiskFull { .. }) {
                    tracing::error!("run failed: {}", error);
                    progress.transition(RunState::Failed);
                    progress.events().send(Event::Run(RunEvent::Error {
                        message: error.to_string(),
                    }));
                }
                Err(error)
            }
        }
    }

    fn execute(&self, progress: &ProgressController) -> Result<RunSummary> {
        let config = preflight(&self.config)?;
        let store = ManifestStore::new(config.manifest_path());
        let mut manifest = store.load_or_create(&config.source_root, &config.destination_root)?;
        manifest.check_source(store.path(), &config.source_root)?;

        let run_id = Uuid::new_v4();
        manifest.last_run_id = Some(run_id);

        progress.start();
        progress.events().send(Event::Run(RunEvent::Started {
            run_id: run_id.to_string(),
        }));
        tracing::info!(
            %run_id,
            source = %config.source_root.display(),
            destination = %config.destination_root.display(),
            known_records = manifest.record_count(),
            "run started"
        );

        let ingest = self.ingest(&config, &mut manifest, &store, progress)?;
        if progress.should_stop() {
            return self.finish_cancelled(&mut manifest, &store, run_id, &ingest, None, progress);
        }

        for stage in [Stage::Grouping, Stage::Selecting] {
            progress
                .events()
                .send(Event::Stage(StageEvent::Started { stage }));
        }
        Grouper::from_config(&config).group_manifest(&mut manifest);
        let grouped = manifest.count_in_state(RecordState::Grouped);
        progress.complete_batch(Stage::Grouping, grouped, 0);
        stage_completed(progress, Stage::Grouping, grouped);

        let recommended = resolve_manifest(&mut manifest);
        progress.complete_batch(Stage::Selecting, recommended, 0);
        stage_completed(progress, Stage::Selecting, recommended);
        store.save(&mut manifest)?;

        if progress.should_stop() {
            return self.finish_cancelled(&mut manifest, &store, run_id, &ingest, None, progress);
        }

        let organized = self.organize(&config, &mut manifest, &store, progress)?;

        if organized.disk_full {
            progress.transition(RunState::Paused);
            let message = format!(
                "destination {} is full; {} files placed before pausing",
                config.destination_root.display(),
                organized.placed + organized.adopted
            );
            tracing::warn!("{}", message);
            progress
                .events()
                .send(Event::Run(RunEvent::Paused { message }));
            return Err(TriageError::DiskFull {
                path: config.destination_root.clone(),
            });
        }

        if progress.should_stop() {
            return self.finish_cancelled(
                &mut manifest,
                &store,
                run_id,
                &ingest,
                Some(&organized),
                progress,
            );
        }

        progress.transition(RunState::Completed);
        let summary = summarize(&manifest, run_id, &ingest, Some(&organized), progress);
        tracing::info!(
            organized = summary.organized,
            groups = summary.group_count(),
            failures = summary.failure_count(),
            duration_ms = summary.duration_ms,
            "run completed"
        );
        progress.events().send(Event::Run(RunEvent::Completed {
            summary: summary.clone(),
        }));
        Ok(summary)
    }

    /// Scan, hash and assess, with the manifest writer on this thread.
    ///
    /// The scanner feeds a bounded queue, so walking never runs far ahead of
    /// hashing. Workers never touch the manifest; they send finished
    /// records back here.
    fn ingest(
        &self,
        config: &TriageConfig,
        manifest: &mut ProcessingManifest,
        store: &ManifestStore,
        progress: &ProgressController,
    ) -> Result<IngestStats> {
        let finalized = FinalizedPaths::from_manifest(manifest);
        let pending = PendingRecords::from_manifest(manifest);
        let scanner = WalkDirScanner::new(ScanConfig::from_triage_config(config));
        let fingerprinter = Fingerprinter::default();
        let assessor = QualityAssessor::from_config(config);
        let counters = IngestCounters::default();
        let events = progress.events();

        for stage in [Stage::Scanning, Stage::Fingerprinting, Stage::Assessing] {
            events.send(Event::Stage(StageEvent::Started { stage }));
        }

        let (hash_tx, hash_rx) = bounded::<FileRecord>(config.queue_capacity);
        let (assess_tx, assess_rx) = bounded::<FileRecord>(config.queue_capacity);
        let (done_tx, done_rx) = unbounded::<FileRecord>();

        let mut writer = ManifestWriter::new(manifest, store, config.flush_every);
        let mut write_error: Option<ManifestError> = None;

        let scan_result: std::result::Result<ScanStats, ScanError> = thread::scope(|s| {
            let scan_handle = {
                let assess_tx = assess_tx.clone();
                let (scanner, finalized, pending, counters) =
                    (&scanner, &finalized, &pending, &counters);
                s.spawn(move || -> std::result::Result<ScanStats, ScanError> {
                    let mut candidates =
                        scanner.candidates(&config.source_root, finalized, Some(events))?;
                    for candidate in candidates.by_ref() {
                        if progress.should_stop() {
                            break;
                        }
                        let size = candidate.stamp.size;
                        progress.add_total(Stage::Scanning, 1, size);
                        progress.complete_item(Stage::Scanning, size);

                        let sent = match pending.plan(candidate) {
                            IngestPlan::Skip { cached_hash } => {
                                if cached_hash {
                                    counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                                }
                                true
                            }
                            IngestPlan::Assess(record) => {
                                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                                progress.add_total(Stage::Assessing, 1, size);
                                assess_tx.send(record).is_ok()
                            }
                            IngestPlan::Full(record) => {
                                progress.add_total(Stage::Fingerprinting, 1, size);
                                hash_tx.send(record).is_ok()
                            }
                        };
                        if !sent {
                            break;
                        }
                    }
                    Ok(candidates.finish())
                })
            };

            for index in 0..config.worker_threads {
                let (hash_rx, assess_tx, done_tx) = (hash_rx.clone(), assess_tx.clone(), done_tx.clone());
                let (fingerprinter, counters) = (&fingerprinter, &counters);
                let spawned = thread::Builder::new()
                    .name(format!("fingerprint-{}", index))
                    .spawn_scoped(s, move || {
                        for mut record in hash_rx.iter() {
                            if progress.should_stop() {
                                break;
                            }
                            let size = record.stamp.size;
                            match fingerprinter.fingerprint(&mut record) {
                                FingerprintOutcome::Hashed => {
                                    counters.hashed.fetch_add(1, Ordering::Relaxed);
                                }
                                FingerprintOutcome::Cached => {
                                    counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                                }
                                FingerprintOutcome::Failed(_) => {
                                    progress.complete_item(Stage::Fingerprinting, size);
                                    report_failure(events, &record);
                                    if done_tx.send(record).is_err() {
                                        break;
                                    }
                                    continue;
                                }
                            }
                            progress.complete_item(Stage::Fingerprinting, size);
                            progress.add_total(Stage::Assessing, 1, size);

                            // Persist the hash even if assessment never finishes
                            if done_tx.send(record.clone()).is_err() || assess_tx.send(record).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    tracing::warn!("could not start fingerprint worker {}: {}", index, e);
                }
            }

            for index in 0..config.worker_threads {
                let (assess_rx, done_tx) = (assess_rx.clone(), done_tx.clone());
                let assessor = &assessor;
                let spawned = thread::Builder::new()
                    .name(format!("assess-{}", index))
                    .spawn_scoped(s, move || {
                        for mut record in assess_rx.iter() {
                            if progress.should_stop() {
                                break;
                            }
                            let size = record.stamp.size;
                            if let AssessOutcome::Failed(_) = assessor.assess(&mut record) {
                                report_failure(events, &record);
                            }
                            progress.complete_item(Stage::Assessing, size);
                            if done_tx.send(record).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    tracing::warn!("could not start assessment worker {}: {}", index, e);
                }
            }

            // Only worker clones may keep the channels open
            drop(hash_rx);
            drop(assess_tx);
            drop(assess_rx);
            drop(done_tx);

            for record in done_rx.iter() {
                if write_error.is_some() {
                    writer.apply_unflushed(record);
                    continue;
                }
                if let Err(e) = writer.apply(record) {
                    tracing::error!("manifest flush failed, stopping: {}", e);
                    progress.request_cancel();
                    write_error = Some(e);
                }
            }

            match scan_handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        if let Some(error) = write_error {
            return Err(error.into());
        }
        writer.flush()?;
        let scan = scan_result?;

        let stats = IngestStats {
            scan,
            hashed: counters.hashed.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
        };
        stage_completed(progress, Stage::Scanning, stats.scan.candidates);
        stage_completed(progress, Stage::Fingerprinting, progress.files_done(Stage::Fingerprinting));
        stage_completed(progress, Stage::Assessing, progress.files_done(Stage::Assessing));
        tracing::info!(
            candidates = stats.scan.candidates,
            skipped_finalized = stats.scan.skipped_finalized,
            hashed = stats.hashed,
            cache_hits = stats.cache_hits,
            warnings = stats.scan.warnings,
            "ingest complete"
        );
        Ok(stats)
    }

    fn organize(
        &self,
        config: &TriageConfig,
        manifest: &mut ProcessingManifest,
        store: &ManifestStore,
        progress: &ProgressController,
    ) -> Result<OrganizeResult> {
        progress.events().send(Event::Stage(StageEvent::Started {
            stage: Stage::Organizing,
        }));

        let plan = OrganizePlanner::new(&config.destination_root, manifest).plan(manifest);
        progress.add_total(Stage::Organizing, plan.len(), plan.total_size_bytes);
        tracing::info!(
            files = plan.len(),
            bytes = plan.total_size_bytes,
            renamed = plan.conflict_count,
            mode = ?config.operation,
            "organizing"
        );

        let started = std::time::Instant::now();
        let mut executor = OrganizeExecutor::new(config.operation, config.worker_threads);
        if let Some(transfer) = &self.transfer {
            executor = executor.with_transfer(transfer.clone());
        }
        let outcomes = executor.execute(&plan, progress);

        for (source, outcome) in &outcomes {
            apply_outcome(manifest, source, outcome);
            if let PlacementOutcome::Failed { reason, detail } = outcome {
                progress.events().send(Event::Record(RecordEvent::Failed {
                    path: source.clone(),
                    reason: *reason,
                    detail: detail.clone(),
                }));
            }
        }
        store.save(manifest)?;

        let result = OrganizeResult::tally(&outcomes, started.elapsed().as_millis() as u64);
        stage_completed(progress, Stage::Organizing, result.placed + result.adopted);
        tracing::info!(
            placed = result.placed,
            adopted = result.adopted,
            failed = result.failed,
            skipped = result.skipped,
            "organize complete"
        );
        Ok(result)
    }

    fn finish_cancelled(
        &self,
        manifest: &mut ProcessingManifest,
        store: &ManifestStore,
        run_id: Uuid,
        ingest: &IngestStats,
        organized: Option<&OrganizeResult>,
        progress: &ProgressController,
    ) -> Result<RunSummary> {
        store.save(manifest)?;
        progress.transition(RunState::Cancelled);
        let summary = summarize(manifest, run_id, ingest, organized, progress);
        tracing::info!("run cancelled; progress saved to {}", store.path().display());
        progress.events().send(Event::Run(RunEvent::Cancelled {
            summary: summary.clone(),
        }));
        Ok(summary)
    }
}

/// Check everything that can fail before any file is touched, and resolve
/// both roots to absolute paths.
fn preflight(config: &TriageConfig) -> Result<TriageConfig> {
    config.validate()?;

    let source_root = config
        .source_root
        .canonicalize()
        .map_err(|_| ConfigError::SourceMissing {
            path: config.source_root.clone(),
        })?;
    if let Err(e) = fs::read_dir(&source_root) {
        return Err(match e.kind() {
            std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied { path: source_root },
            _ => ScanError::ReadDirectory {
                path: source_root,
                source: e,
            },
        }
        .into());
    }

    let unwritable = |path: &Path, e: std::io::Error| TriageError::DestinationUnwritable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    fs::create_dir_all(&config.destination_root)
        .map_err(|e| unwritable(&config.destination_root, e))?;
    let destination_root = config
        .destination_root
        .canonicalize()
        .map_err(|e| unwritable(&config.destination_root, e))?;
    check_writable(&destination_root).map_err(|e| unwritable(&destination_root, e))?;

    let mut resolved = config.clone();
    resolved.source_root = source_root;
    resolved.destination_root = destination_root;
    let manifest_path = resolved.manifest_path();
    resolved.manifest_path = Some(manifest_path.clone());

    if let Some(parent) = manifest_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .and_then(|_| check_writable(parent))
            .map_err(|source| ManifestError::Write {
                path: manifest_path.clone(),
                source,
            })?;
    }

    Ok(resolved)
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    let mut scratch = tempfile::Builder::new()
        .prefix(".photo-triage-write-check")
        .tempfile_in(dir)?;
    scratch.write_all(b"ok")?;
    scratch.as_file().sync_all()?;
    Ok(())
}

fn report_failure(events: &EventSender, record: &FileRecord) {
    if let Some(reason) = record.failure {
        events.send(Event::Record(RecordEvent::Failed {
            path: record.path.clone(),
            reason,
            detail: record.failure_detail.clone().unwrap_or_default(),
        }));
    }
}

fn stage_completed(progress: &ProgressController, stage: Stage, files: usize) {
    progress.emit_now(stage);
    progress
        .events()
        .send(Event::Stage(StageEvent::Completed { stage, files }));
}

fn summarize(
    manifest: &ProcessingManifest,
    run_id: Uuid,
    ingest: &IngestStats,
    organized: Option<&OrganizeResult>,
    progress: &ProgressController,
) -> RunSummary {
    let mut groups: BTreeMap<Category, usize> = BTreeMap::new();
    for group in manifest.groups() {
        *groups.entry(group.category).or_insert(0) += 1;
    }

    let dated_tree = manifest.destination_root.join(ORGANIZED_DIR);
    let accepted = manifest
        .records()
        .filter(|r| r.is_organized())
        .filter(|r| r.destination.as_deref().is_some_and(|d| d.starts_with(&dated_tree)))
        .count();

    RunSummary {
        run_id: run_id.to_string(),
        status: progress.state(),
        total_records: manifest.record_count(),
        candidates: ingest.scan.candidates,
        skipped_finalized: ingest.scan.skipped_finalized,
        hashed: ingest.hashed,
        cache_hits: ingest.cache_hits,
        organized: organized.map(|o| o.placed + o.adopted).unwrap_or(0),
        accepted,
        groups,
        files_by_category: manifest.category_counts(),
        failures: manifest.failure_counts(),
        bytes_processed: progress.bytes_done(Stage::Fingerprinting)
            + organized.map(|o| o.bytes_written).unwrap_or(0),
        duration_ms: progress.elapsed().as_millis() as u64,
    }
}
