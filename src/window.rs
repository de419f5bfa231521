//! Sliding pulse window
//!
//! Keeps the timestamps of recent pulses so the classifier can extrapolate a
//! cadence from the trailing few seconds.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Pulse timestamps inside the trailing window `(now - span, now]`
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    pulses: VecDeque<DateTime<Utc>>,
    span: Duration,
}

impl SlidingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            pulses: VecDeque::new(),
            span,
        }
    }

    /// Window span
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Window span in fractional seconds
    pub fn span_secs(&self) -> f64 {
        self.span.num_milliseconds() as f64 / 1000.0
    }

    /// Drop expired pulses, record `now` and return the resulting count
    pub fn record(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        // Duplicate instants collapse to one pulse
        if !self.pulses.contains(&now) {
            let pos = self.pulses.partition_point(|t| *t < now);
            self.pulses.insert(pos, now);
        }
        self.pulses.len()
    }

    /// Remove every pulse at or before `now - span`
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        while let Some(oldest) = self.pulses.front() {
            if *oldest <= cutoff {
                self.pulses.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    pub fn clear(&mut self) {
        self.pulses.clear();
    }

    /// Iterate pulses oldest first
    pub fn iter(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.pulses.iter()
    }
}
