//! Resumability: cancelled and paused runs, interrupted organize passes,
//! changed files and copies arriving in later runs.

use assert_fs::prelude::*;
use assert_fs::TempDir;
use photo_triage::config::TriageConfig;
use photo_triage::core::manifest::{ManifestStore, ProcessingManifest};
use photo_triage::core::organize::{copy_no_clobber, TransferFn};
use photo_triage::core::progress::{CancellationToken, ProgressController, RunState};
use photo_triage::core::record::{Category, FailureReason, RecordState};
use photo_triage::core::Pipeline;
use photo_triage::error::TriageError;
use photo_triage::events::{Event, EventSender, Stage};
use predicates::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn write_image(path: &Path, seed: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = image::RgbImage::from_fn(32, 32, |x, y| {
        let v = ((x * 7 + y * 13 + seed * 31) % 256) as u8;
        image::Rgb([v, 255 - v, (seed % 256) as u8])
    });
    img.save(path).unwrap();
}

fn config(src: &Path, dst: &Path) -> TriageConfig {
    let mut config = TriageConfig::new(src, dst);
    config.worker_threads = 2;
    config.queue_capacity = 4;
    config.flush_every = 5;
    config.progress_interval_ms = 0;
    config.min_size_bytes = 0;
    config.min_resolution = 0;
    config.blur_threshold = 0.0;
    config.burst_use_filesystem_time = false;
    config
}

fn store(dst: &Path) -> ManifestStore {
    ManifestStore::new(dst.join(".photo-triage/manifest.json"))
}

fn load(dst: &Path) -> ProcessingManifest {
    store(dst).load().unwrap().unwrap()
}

/// Every group's members point back at it, no path sits in two groups, and
/// duplicate groups share one content
fn assert_groups_consistent(manifest: &ProcessingManifest) {
    let mut seen = HashSet::new();
    for group in manifest.groups() {
        for member in &group.members {
            assert!(seen.insert(member.clone()), "{} is in two groups", member.display());
            let record = manifest.record(member).unwrap();
            assert_eq!(record.group_id.as_deref(), Some(group.id.as_str()));
        }
        if group.category == Category::Duplicate {
            assert!(group.len() >= 2);
            let contents: HashSet<_> = group
                .members
                .iter()
                .map(|m| {
                    let r = manifest.record(m).unwrap();
                    (r.hash.clone(), r.size)
                })
                .collect();
            assert_eq!(contents.len(), 1, "group {} mixes contents", group.id);
        }
    }
    for record in manifest.records() {
        if let Some(id) = &record.group_id {
            assert!(manifest.group(id).is_some_and(|g| g.contains(&record.path)));
        }
    }
}

/// Output files, ignoring the state directory
fn output_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.path().components().any(|c| c.as_os_str() == ".photo-triage"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[test]
fn cancelled_run_resumes_without_rehashing_or_duplicating() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    const FILES: usize = 80;
    for i in 0..FILES {
        write_image(&src.path().join(format!("roll{}/IMG_{:04}.png", i % 3, i)), i as u32);
    }

    // A rendezvous channel: every event waits for the listener, so the
    // cancel lands while hashing is still under way
    let token = CancellationToken::new();
    let (tx, rx) = crossbeam_channel::bounded::<Event>(0);
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            for event in rx.iter() {
                if let Event::Progress(p) = event {
                    if p.stage == Stage::Fingerprinting && p.files_done >= 10 {
                        token.cancel();
                    }
                }
            }
        })
    };

    let controller = ProgressController::new(token.clone(), EventSender::new(tx), Duration::ZERO, 16);
    let first = Pipeline::builder()
        .config(config(src.path(), dst.path()))
        .cancellation_token(token)
        .build()
        .run_with_controller(&controller)
        .unwrap();
    drop(controller);
    canceller.join().unwrap();

    assert_eq!(first.status, RunState::Cancelled);
    assert!(first.hashed >= 10);
    assert!(first.hashed < FILES);
    assert_eq!(first.organized, 0);
    assert!(store(dst.path()).exists());

    let second = Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    assert_eq!(second.status, RunState::Completed);
    // Each file is hashed exactly once across both runs
    assert_eq!(first.hashed + second.hashed, FILES);

    let manifest = store(dst.path()).load().unwrap().unwrap();
    assert_eq!(manifest.record_count(), FILES);
    assert!(manifest.records().all(|r| r.state == RecordState::Organized));

    // No file was placed twice
    assert_eq!(output_files(dst.path()).len(), FILES);
    for i in 0..FILES {
        src.child(format!("roll{}/IMG_{:04}.png", i % 3, i))
            .assert(predicate::path::exists());
    }
}

#[test]
fn interrupted_organize_adopts_files_already_copied() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    for i in 0..4 {
        write_image(&src.path().join(format!("IMG_{}.png", i)), i);
    }
    Pipeline::new(config(src.path(), dst.path())).run().unwrap();
    let before = output_files(dst.path());

    // Simulate a crash after the copies landed but before the manifest said so
    let store = store(dst.path());
    let mut manifest = store.load().unwrap().unwrap();
    for record in manifest.records_mut() {
        record.state = RecordState::Resolved;
        record.destination = None;
    }
    store.save(&mut manifest).unwrap();

    let summary = Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    assert_eq!(summary.hashed, 0);
    assert_eq!(summary.organized, 4);
    assert_eq!(output_files(dst.path()), before);
    let manifest = store.load().unwrap().unwrap();
    assert!(manifest.records().all(|r| r.destination.is_some()));
}

#[test]
fn changed_file_is_processed_again() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    write_image(&src.path().join("IMG_0.png"), 0);
    write_image(&src.path().join("IMG_1.png"), 1);
    Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    // Different dimensions guarantee a different size
    image::RgbImage::from_pixel(40, 40, image::Rgb([9, 9, 9]))
        .save(src.path().join("IMG_1.png"))
        .unwrap();

    let summary = Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.hashed, 1);
    assert_eq!(summary.skipped_finalized, 1);
    // The new content lands next to the old copy instead of replacing it
    assert_eq!(output_files(dst.path()).len(), 3);
}

#[test]
fn manifest_for_another_source_is_refused() {
    let temp = TempDir::new().unwrap();
    let first_src = temp.child("first");
    let other_src = temp.child("other");
    let dst = temp.child("dst");
    write_image(&first_src.path().join("a.png"), 1);
    other_src.create_dir_all().unwrap();

    Pipeline::new(config(first_src.path(), dst.path())).run().unwrap();
    let error = Pipeline::new(config(other_src.path(), dst.path()))
        .run()
        .unwrap_err();

    assert!(error.to_string().contains("belongs to source"));
}

#[test]
fn changed_copy_leaves_its_duplicate_group() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    write_image(&src.path().join("A.png"), 5);
    fs::copy(src.path().join("A.png"), src.path().join("B.png")).unwrap();

    let first = Pipeline::new(config(src.path(), dst.path())).run().unwrap();
    assert_eq!(first.groups.get(&Category::Duplicate), Some(&1));

    image::RgbImage::from_pixel(40, 40, image::Rgb([200, 10, 10]))
        .save(src.path().join("B.png"))
        .unwrap();
    let second = Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    assert_eq!(second.hashed, 1);
    assert_eq!(second.groups.get(&Category::Duplicate), None);
    let manifest = load(dst.path());
    assert_groups_consistent(&manifest);
    for record in manifest.records() {
        assert_eq!(record.group_id, None);
        assert!(!record.recommended);
        assert_eq!(record.state, RecordState::Organized);
    }
}

#[test]
fn copy_added_in_a_later_run_goes_to_duplicate_review() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    write_image(&src.path().join("A.png"), 6);
    Pipeline::new(config(src.path(), dst.path())).run().unwrap();
    let a = src.path().join("A.png").canonicalize().unwrap();
    let placed_a = load(dst.path()).record(&a).unwrap().destination.clone().unwrap();

    fs::copy(src.path().join("A.png"), src.path().join("B.png")).unwrap();
    let summary = Pipeline::new(config(src.path(), dst.path())).run().unwrap();

    assert_eq!(summary.groups.get(&Category::Duplicate), Some(&1));
    assert_eq!(summary.accepted, 1);

    let manifest = load(dst.path());
    assert_groups_consistent(&manifest);
    let group = manifest.groups().next().unwrap();
    let b = src.path().join("B.png").canonicalize().unwrap();
    assert_eq!(group.members, vec![a.clone(), b.clone()]);
    assert_eq!(group.recommended.as_ref(), Some(&a));

    // The settled copy stays put; the newcomer waits in review
    assert_eq!(manifest.record(&a).unwrap().destination.as_ref(), Some(&placed_a));
    assert!(placed_a.exists());
    dst.child("Review/Duplicates")
        .child(&group.id)
        .child("B.png")
        .assert(predicate::path::eq_file(src.path().join("B.png")));
    assert_eq!(output_files(dst.path()).len(), 2);
}

#[cfg(unix)]
#[test]
fn full_destination_pauses_and_resumes() {
    let temp = TempDir::new().unwrap();
    let src = temp.child("src");
    let dst = temp.child("dst");
    for i in 0..3 {
        write_image(&src.path().join(format!("IMG_{}.png", i)), 20 + i);
    }
    let mut first_config = config(src.path(), dst.path());
    first_config.worker_threads = 1;

    // Room for exactly one file
    let calls = Arc::new(AtomicUsize::new(0));
    let transfer: TransferFn = {
        let calls = calls.clone();
        Arc::new(move |source: &Path, destination: &Path| {
            if calls.fetch_add(1, Ordering::SeqCst) >= 1 {
                return Err(std::io::Error::from_raw_os_error(28));
            }
            copy_no_clobber(source, destination)
        })
    };

    let controller = ProgressController::new(
        CancellationToken::new(),
        photo_triage::events::null_sender(),
        Duration::ZERO,
        16,
    );
    let error = Pipeline::builder()
        .config(first_config)
        .transfer(transfer)
        .build()
        .run_with_controller(&controller)
        .unwrap_err();

    assert!(matches!(error, TriageError::DiskFull { .. }));
    assert!(error.is_retryable());
    assert_eq!(controller.state(), RunState::Paused);
    // The third placement was never attempted
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let manifest = load(dst.path());
    assert_eq!(manifest.count_in_state(RecordState::Organized), 1);
    assert_eq!(manifest.count_in_state(RecordState::Resolved), 2);
    assert_eq!(manifest.failure_counts().get(&FailureReason::DiskFull), Some(&1));
    assert_eq!(output_files(dst.path()).len(), 1);

    let resumed = Pipeline::new(config(src.path(), dst.path())).run().unwrap();
    assert_eq!(resumed.status, RunState::Completed);
    assert_eq!(resumed.hashed, 0);
    assert_eq!(resumed.organized, 2);
    let manifest = load(dst.path());
    assert!(manifest.records().all(|r| r.is_organized() && r.failure.is_none()));
    assert_eq!(output_files(dst.path()).len(), 3);
}
