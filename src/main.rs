//! # photo-triage CLI
//!
//! Command-line interface for the photo triage pipeline.
//!
//! ## Usage
//! ```bash
//! photo-triage run ~/Takeout ~/Sorted
//! photo-triage status ~/Sorted --output json
//! photo-triage review apply ~/Sorted dup-3f2a9c81d07e keep-recommended
//! ```

mod cli;

use photo_triage::Result;

fn main() -> Result<()> {
    cli::run()
}
