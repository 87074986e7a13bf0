//! Moving-window throughput for ETA estimates.

use std::collections::VecDeque;
use std::time::Instant;

/// Completion samples over the most recent `capacity` items
#[derive(Debug, Clone)]
pub struct ThroughputWindow {
    samples: VecDeque<(Instant, u64)>,
    capacity: usize,
}

impl ThroughputWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
        }
    }

    /// Record that `completed` items were done at `at`
    pub fn record(&mut self, at: Instant, completed: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, completed));
    }

    /// Items per second across the window
    pub fn rate(&self) -> Option<f64> {
        let (first_at, first_done) = *self.samples.front()?;
        let (last_at, last_done) = *self.samples.back()?;

        let elapsed = last_at.saturating_duration_since(first_at).as_secs_f64();
        let items = last_done.saturating_sub(first_done) as f64;
        if elapsed <= 0.0 || items <= 0.0 {
            return None;
        }
        Some(items / elapsed)
    }

    /// Seconds until `remaining` more items are done at the current rate
    pub fn eta_seconds(&self, remaining: u64) -> Option<f64> {
        if remaining == 0 {
            return Some(0.0);
        }
        self.rate().map(|rate| remaining as f64 / rate)
    }
}
