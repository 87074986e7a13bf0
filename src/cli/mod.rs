//! # CLI Module
//!
//! Command-line interface for the photo triage pipeline.
//!
//! ## Usage
//! ```bash
//! # Triage an export into a sorted tree (copies by default)
//! photo-triage run ~/Takeout ~/Sorted
//!
//! # Move instead of copy, with a looser burst window
//! photo-triage run ~/Takeout ~/Sorted --operation move --burst-window 15
//!
//! # What is done, what failed, what awaits review
//! photo-triage status ~/Sorted
//!
//! # Review queue and decisions
//! photo-triage review list ~/Sorted
//! photo-triage review apply ~/Sorted burst-20220801-101500-3f2a9c81 keep-recommended
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_triage::config::{TriageConfig, STATE_DIR};
use photo_triage::core::manifest::{ManifestStore, ProcessingManifest};
use photo_triage::core::organize::OperationMode;
use photo_triage::core::record::{Group, RecordState};
use photo_triage::core::review::{apply_review_decision, pending_groups, ReviewDecision};
use photo_triage::core::Pipeline;
use photo_triage::error::{ConfigError, Result};
use photo_triage::events::{Event, EventChannel, RecordEvent, RunEvent, RunSummary, ScanEvent, StageEvent};
use std::path::{Path, PathBuf};
use std::thread;

/// Photo Triage - sort an archive export without losing a file
#[derive(Parser, Debug)]
#[command(name = "photo-triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan, deduplicate, group and organize a source tree
    Run(RunArgs),

    /// Summarize the manifest of a destination
    Status {
        /// Destination root of an earlier run
        destination: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Inspect and resolve review groups
    #[command(subcommand)]
    Review(ReviewCommand),
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
    /// Groups still waiting for a decision
    List {
        destination: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Apply a decision to one group
    Apply {
        destination: PathBuf,

        /// Group id as shown by `review list`
        group: String,

        decision: Decision,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Manifest location (default: <DEST>/.photo-triage/manifest.json)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "pretty")]
    output: OutputFormat,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory to triage
    source: PathBuf,

    /// Where the sorted tree is written
    destination: PathBuf,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads per stage
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Sharpness below which an image is flagged blurry
    #[arg(long)]
    blur_threshold: Option<f64>,

    /// Pixel area below which an image is flagged too small
    #[arg(long)]
    min_resolution: Option<u64>,

    /// Byte size below which a file is flagged too small
    #[arg(long)]
    min_size: Option<u64>,

    /// Maximum gap in seconds between shots of one burst
    #[arg(long)]
    burst_window: Option<f64>,

    /// Copy (default) or move files into the destination
    #[arg(long)]
    operation: Option<Mode>,

    /// Include hidden files and directories
    #[arg(long)]
    include_hidden: bool,

    /// Follow symbolic links while scanning
    #[arg(long)]
    follow_symlinks: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Leave sources in place
    Copy,
    /// Rename into the destination
    Move,
}

impl From<Mode> for OperationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Copy => OperationMode::Copy,
            Mode::Move => OperationMode::Move,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Decision {
    /// Place the recommended member into the dated tree
    KeepRecommended,
    /// Place every member into the dated tree
    KeepAll,
    /// Record the decision, place nothing
    Dismiss,
}

impl From<Decision> for ReviewDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::KeepRecommended => ReviewDecision::KeepRecommended,
            Decision::KeepAll => ReviewDecision::KeepAll,
            Decision::Dismiss => ReviewDecision::Dismiss,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    photo_triage::init_tracing(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Run(args) => run_triage(args, cli.verbose),
        Commands::Status {
            destination,
            common,
        } => show_status(&destination, &common),
        Commands::Review(ReviewCommand::List {
            destination,
            common,
        }) => list_reviews(&destination, &common),
        Commands::Review(ReviewCommand::Apply {
            destination,
            group,
            decision,
            common,
        }) => apply_review(&destination, &group, decision.into(), &common),
    }
}

fn build_config(args: &RunArgs) -> Result<TriageConfig> {
    let mut config = match &args.config {
        Some(path) => TriageConfig::from_file(path)?,
        None => TriageConfig::default(),
    };

    config.source_root = args.source.clone();
    config.destination_root = args.destination.clone();
    if let Some(manifest) = &args.common.manifest {
        config.manifest_path = Some(manifest.clone());
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    if let Some(threshold) = args.blur_threshold {
        config.blur_threshold = threshold;
    }
    if let Some(resolution) = args.min_resolution {
        config.min_resolution = resolution;
    }
    if let Some(size) = args.min_size {
        config.min_size_bytes = size;
    }
    if let Some(window) = args.burst_window {
        config.burst_window_seconds = window;
    }
    if let Some(mode) = args.operation {
        config.operation = mode.into();
    }
    config.include_hidden |= args.include_hidden;
    config.follow_symlinks |= args.follow_symlinks;

    Ok(config)
}

fn run_triage(args: RunArgs, verbose: bool) -> Result<()> {
    let term = Term::stderr();
    let output = args.common.output;
    let config = build_config(&args)?;

    if matches!(output, OutputFormat::Pretty) {
        term.write_line(&format!(
            "{} {}",
            style("Photo Triage").bold().cyan(),
            style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line(&format!(
            "  {} → {} ({:?})",
            display_path(&config.source_root),
            display_path(&config.destination_root),
            config.operation
        ))
        .ok();
        term.write_line("").ok();
    }

    let pipeline = Pipeline::new(config);
    let (sender, receiver) = EventChannel::new();

    let progress = if matches!(output, OutputFormat::Pretty) {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {prefix:>18} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Some(pb)
    } else {
        None
    };

    let progress_clone = progress.clone();
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(pb) = progress_clone.as_ref() else {
                continue;
            };
            match event {
                Event::Stage(StageEvent::Started { stage }) => {
                    pb.set_prefix(stage.to_string());
                }
                Event::Progress(p) => {
                    pb.set_prefix(p.stage.to_string());
                    pb.set_length(p.files_total as u64);
                    pb.set_position(p.files_done as u64);
                    match p.eta_seconds {
                        Some(eta) => pb.set_message(format!("eta {:.0}s", eta)),
                        None => pb.set_message(""),
                    }
                }
                Event::Scan(ScanEvent::Warning { path, message }) => {
                    pb.println(format!(
                        "{} {}: {}",
                        style("!").yellow(),
                        display_path(&path),
                        message
                    ));
                }
                Event::Record(RecordEvent::Failed { path, reason, .. }) if verbose => {
                    pb.println(format!(
                        "{} {} ({})",
                        style("✗").red(),
                        display_path(&path),
                        reason
                    ));
                }
                Event::Run(RunEvent::Completed { .. })
                | Event::Run(RunEvent::Cancelled { .. })
                | Event::Run(RunEvent::Paused { .. })
                | Event::Run(RunEvent::Error { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    });

    let result = pipeline.run_with_events(&sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();

    let summary = result?;
    match output {
        OutputFormat::Pretty => print_summary(&term, &summary),
        OutputFormat::Json => print_json(&summary),
    }
    Ok(())
}

fn print_summary(term: &Term, summary: &RunSummary) {
    term.write_line(&format!(
        "{} Run {}",
        style("✓").green().bold(),
        summary.status
    ))
    .ok();
    term.write_line("").ok();

    term.write_line(&format!(
        "  {} files known, {} new or changed this run ({} already organized)",
        style(summary.total_records).cyan(),
        style(summary.candidates).cyan(),
        summary.skipped_finalized
    ))
    .ok();
    term.write_line(&format!(
        "  {} hashed, {} reused from the manifest",
        style(summary.hashed).cyan(),
        style(summary.cache_hits).dim()
    ))
    .ok();
    term.write_line(&format!(
        "  {} placed this run, {} in the dated tree, {} processed in {:.1}s",
        style(summary.organized).cyan(),
        style(summary.accepted).green(),
        format_bytes(summary.bytes_processed),
        summary.duration_ms as f64 / 1000.0
    ))
    .ok();

    if !summary.groups.is_empty() {
        term.write_line("").ok();
        term.write_line(&format!("{}", style("For review:").bold().underlined()))
            .ok();
        for (category, groups) in &summary.groups {
            let files = summary.files_by_category.get(category).copied().unwrap_or(0);
            term.write_line(&format!(
                "  {:<12} {} groups, {} files",
                category.to_string(),
                style(groups).yellow(),
                files
            ))
            .ok();
        }
    }

    if !summary.failures.is_empty() {
        term.write_line("").ok();
        term.write_line(&format!("{}", style("Problems:").bold().underlined()))
            .ok();
        for (reason, count) in &summary.failures {
            term.write_line(&format!("  {:<18} {}", reason.to_string(), style(count).red()))
                .ok();
        }
    }

    term.write_line("").ok();
    term.write_line(&format!(
        "{}",
        style("No source file was deleted. Review folders are under Review/.").dim()
    ))
    .ok();
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn manifest_store(destination: &Path, common: &CommonArgs) -> ManifestStore {
    ManifestStore::new(
        common
            .manifest
            .clone()
            .unwrap_or_else(|| destination.join(STATE_DIR).join("manifest.json")),
    )
}

fn load_manifest(store: &ManifestStore) -> Result<ProcessingManifest> {
    match store.load()? {
        Some(manifest) => Ok(manifest),
        None => Err(ConfigError::Unreadable {
            path: store.path().to_path_buf(),
            reason: "no manifest found; run `photo-triage run` first".to_string(),
        }
        .into()),
    }
}

fn show_status(destination: &Path, common: &CommonArgs) -> Result<()> {
    let store = manifest_store(destination, common);
    let manifest = load_manifest(&store)?;

    let states = [
        RecordState::Scanned,
        RecordState::Hashed,
        RecordState::Scored,
        RecordState::Grouped,
        RecordState::Resolved,
        RecordState::Organized,
        RecordState::Failed,
    ];
    let pending = pending_groups(&manifest);

    if matches!(common.output, OutputFormat::Json) {
        let by_state: serde_json::Map<String, serde_json::Value> = states
            .iter()
            .map(|s| {
                (
                    serde_json::to_value(s)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    manifest.count_in_state(*s).into(),
                )
            })
            .collect();
        print_json(&serde_json::json!({
            "source_root": manifest.source_root,
            "destination_root": manifest.destination_root,
            "updated_at": manifest.updated_at,
            "last_run_id": manifest.last_run_id,
            "records": manifest.record_count(),
            "states": by_state,
            "categories": manifest.category_counts(),
            "failures": manifest.failure_counts(),
            "pending_review": pending.len(),
            "decisions": manifest.decisions().len(),
        }));
        return Ok(());
    }

    let term = Term::stdout();
    term.write_line(&format!(
        "{} {}",
        style("Manifest").bold(),
        style(store.path().display()).dim()
    ))
    .ok();
    term.write_line(&format!(
        "  source {}, updated {}",
        display_path(&manifest.source_root),
        manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ))
    .ok();
    term.write_line("").ok();
    for state in states {
        let count = manifest.count_in_state(state);
        if count > 0 {
            term.write_line(&format!("  {:<10} {}", format!("{:?}", state), style(count).cyan()))
                .ok();
        }
    }
    for (reason, count) in manifest.failure_counts() {
        term.write_line(&format!("  {:<18} {}", reason.to_string(), style(count).red()))
            .ok();
    }
    term.write_line("").ok();
    term.write_line(&format!(
        "  {} groups awaiting review, {} decided",
        style(pending.len()).yellow(),
        manifest.decisions().len()
    ))
    .ok();
    Ok(())
}

fn list_reviews(destination: &Path, common: &CommonArgs) -> Result<()> {
    let store = manifest_store(destination, common);
    let manifest = load_manifest(&store)?;
    let pending = pending_groups(&manifest);

    if matches!(common.output, OutputFormat::Json) {
        print_json(&pending);
        return Ok(());
    }

    let term = Term::stdout();
    if pending.is_empty() {
        term.write_line(&format!("{} Nothing left to review", style("✓").green()))
            .ok();
        return Ok(());
    }

    for group in pending {
        print_group(&term, &manifest, group);
    }
    Ok(())
}

fn print_group(term: &Term, manifest: &ProcessingManifest, group: &Group) {
    term.write_line(&format!(
        "{} {} ({} files)",
        style(&group.id).bold(),
        style(group.category).yellow(),
        group.len()
    ))
    .ok();

    for member in &group.members {
        let marker = if group.is_recommended(member) {
            style("★").green().to_string()
        } else {
            style("○").dim().to_string()
        };
        let score = manifest
            .record(member)
            .and_then(|r| r.quality_score)
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string());
        term.write_line(&format!(
            "    {} {} {}",
            marker,
            display_path(member),
            style(format!("score {}", score)).dim()
        ))
        .ok();
    }
    term.write_line("").ok();
}

fn apply_review(
    destination: &Path,
    group_id: &str,
    decision: ReviewDecision,
    common: &CommonArgs,
) -> Result<()> {
    let store = manifest_store(destination, common);
    let mut manifest = load_manifest(&store)?;
    let destination_root = manifest.destination_root.clone();

    let applied = apply_review_decision(&mut manifest, &destination_root, group_id, decision)?;
    store.save(&mut manifest)?;

    match common.output {
        OutputFormat::Json => print_json(&applied),
        OutputFormat::Pretty => {
            let term = Term::stdout();
            term.write_line(&format!(
                "{} {} → {}",
                style("✓").green().bold(),
                style(&applied.group_id).bold(),
                applied.decision
            ))
            .ok();
            for path in &applied.placed {
                term.write_line(&format!("    {}", display_path(path))).ok();
            }
        }
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    let home = dirs::home_dir().unwrap_or_default();
    match path.strip_prefix(&home) {
        Ok(relative) if !home.as_os_str().is_empty() => format!("~/{}", relative.display()),
        _ => path.display().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "photo-triage",
            "run",
            "/in",
            "/out",
            "-j",
            "2",
            "--burst-window",
            "15",
            "--operation",
            "move",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.burst_window_seconds, 15.0);
        assert_eq!(config.operation, OperationMode::Move);
        assert_eq!(config.source_root, PathBuf::from("/in"));
    }

    #[test]
    fn review_decisions_parse() {
        let cli = Cli::try_parse_from([
            "photo-triage",
            "review",
            "apply",
            "/out",
            "dup-abc",
            "keep-all",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Review(ReviewCommand::Apply {
                decision: Decision::KeepAll,
                ..
            })
        ));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
