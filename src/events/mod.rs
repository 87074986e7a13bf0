//! # Events Module
//!
//! Progress and outcome reporting, decoupled from any particular UI.
//!
//! ## Design
//! The core emits events through a channel; the CLI (or any other front
//! end) subscribes and renders them. Progress snapshots are throttled by the
//! [`ProgressController`](crate::core::progress::ProgressController), so a
//! consumer never sees one event per file.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Progress(p) = event {
//!             println!("{}: {:.0}% (eta {:?}s)", p.stage, p.percent_complete, p.eta_seconds);
//!         }
//!     }
//! });
//!
//! pipeline.run_with_events(&sender)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
