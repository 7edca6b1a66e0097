use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ChunkDescriptor;

/// Point-in-time view of an upload's progress.
///
/// Derived from the set of succeeded chunk indices; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// `round(uploaded_bytes / total_bytes * 100)`, capped at 99 until every
    /// chunk has succeeded; 100 for an empty file.
    pub percentage: u8,
}

impl ProgressSnapshot {
    /// Computes a snapshot for `plan` given the succeeded indices.
    ///
    /// Indices not present in `plan` are ignored.
    pub fn compute(plan: &[ChunkDescriptor], succeeded: &BTreeSet<usize>) -> Self {
        let total_bytes = plan.last().map_or(0, |c| c.end);
        let (uploaded_chunks, uploaded_bytes) = plan
            .iter()
            .filter(|c| succeeded.contains(&c.index))
            .fold((0, 0u64), |(n, bytes), c| (n + 1, bytes + c.size()));

        let percentage = if total_bytes == 0 {
            100
        } else {
            let rounded = (uploaded_bytes as f64 / total_bytes as f64 * 100.0).round() as u8;
            if uploaded_chunks < plan.len() {
                rounded.min(99)
            } else {
                rounded
            }
        };

        Self {
            uploaded_chunks,
            total_chunks: plan.len(),
            uploaded_bytes,
            total_bytes,
            percentage,
        }
    }

    /// Bytes still to transfer.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes - self.uploaded_bytes
    }

    /// Returns `true` once every chunk has succeeded.
    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks == self.total_chunks
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Sliding-window throughput estimate over cumulative byte counts.
///
/// Not used by the coordinator itself; callers feed it from their progress
/// callback when they want a rate or ETA.
#[derive(Debug)]
pub struct SpeedCalculator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Records the cumulative uploaded byte count now.
    pub fn record(&mut self, uploaded_bytes: u64) {
        self.record_at(Instant::now(), uploaded_bytes);
    }

    /// Records the cumulative uploaded byte count at `at`.
    pub fn record_at(&mut self, at: Instant, uploaded_bytes: u64) {
        self.samples.push_back((at, uploaded_bytes));
        while self.samples.len() > 2
            && self
                .samples
                .front()
                .is_some_and(|(t, _)| at.duration_since(*t) > self.window)
        {
            self.samples.pop_front();
        }
    }

    /// Average bytes/second across the window, 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(*t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        b1.saturating_sub(*b0) as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`, `None` while the rate is 0.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        (speed > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
