//! Fixed-bucket histogram over atomics.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durations in seconds, bucketed by fixed upper bounds plus `+Inf`.
///
/// Bucket counts are stored non-cumulatively; rendering accumulates them.
pub struct DurationHistogram {
    upper_bounds: &'static [f64],
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
}

impl DurationHistogram {
    pub fn new(upper_bounds: &'static [f64]) -> Self {
        Self {
            upper_bounds,
            counts: (0..=upper_bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
        }
    }

    /// Index of the bucket `secs` falls in (`bound_{i-1} < secs <= bound_i`).
    pub fn find_bucket_index(&self, secs: f64) -> usize {
        self.upper_bounds
            .iter()
            .position(|&bound| secs <= bound)
            .unwrap_or(self.upper_bounds.len())
    }

    pub fn observe(&self, secs: f64) {
        let secs = secs.max(0.0);
        self.counts[self.find_bucket_index(secs)].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((secs * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn sum_secs(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Per-bucket (non-cumulative) counts, `+Inf` last.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    pub(crate) fn render_prometheus(&self, name: &str, out: &mut String) {
        let counts = self.bucket_counts();
        let mut cumulative = 0;
        for (i, count) in counts.iter().enumerate() {
            cumulative += count;
            match self.upper_bounds.get(i) {
                Some(bound) => {
                    let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
                }
                None => {
                    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
                }
            }
        }
        let _ = writeln!(out, "{name}_sum {}", self.sum_secs());
        let _ = writeln!(out, "{name}_count {cumulative}");
    }
}
