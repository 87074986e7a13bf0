//! # Photo Triage
//!
//! Turns an unsorted photo/video archive export into a deduplicated,
//! date-organized tree, with everything doubtful queued for human review.
//!
//! ## Core Philosophy
//! - **Never delete** - Sources are copied (or moved) and never removed or truncated
//! - **Resumable** - A manifest records every file, so a rerun only does what is left
//! - **Deterministic** - The same input always yields the same groups and keepers
//!
//! ## Architecture
//! - `core` - The triage engine
//! - `config` - Run configuration and validation
//! - `events` - Event-driven progress reporting
//! - `error` - Error types with recovery hints

pub mod config;
pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use config::TriageConfig;
pub use error::{Result, TriageError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. `RUST_LOG` wins
/// over `default_level` when set. Calling it twice is harmless.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
