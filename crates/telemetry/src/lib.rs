//! Process-wide exchange metrics for streamrelay.
//!
//! Three instruments: a monotonically increasing token counter, a
//! fixed-bucket histogram of exchange durations, and a gauge of exchanges
//! in flight. All updates are lock-free atomics so concurrent exchanges can
//! share one [`ExchangeMetrics`].

pub mod histogram;

pub use histogram::DurationHistogram;

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use streamrelay_core::metrics::MetricsSink;

/// Upper bounds (seconds) of the exchange duration buckets.
pub const DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

static GLOBAL: LazyLock<Arc<ExchangeMetrics>> = LazyLock::new(|| Arc::new(ExchangeMetrics::new()));

/// The shared instance used by the binary.
pub fn global() -> Arc<ExchangeMetrics> {
    GLOBAL.clone()
}

pub struct ExchangeMetrics {
    total_tokens: AtomicU64,
    active_exchanges: AtomicI64,
    duration: DurationHistogram,
}

/// A point-in-time copy of every instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_tokens: u64,
    pub active_exchanges: i64,
    pub exchanges_completed: u64,
    pub duration_sum_secs: f64,
}

impl ExchangeMetrics {
    pub fn new() -> Self {
        Self {
            total_tokens: AtomicU64::new(0),
            active_exchanges: AtomicI64::new(0),
            duration: DurationHistogram::new(DURATION_BUCKETS),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    pub fn active_exchanges(&self) -> i64 {
        self.active_exchanges.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> &DurationHistogram {
        &self.duration
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_tokens: self.total_tokens(),
            active_exchanges: self.active_exchanges(),
            exchanges_completed: self.duration.count(),
            duration_sum_secs: self.duration.sum_secs(),
        }
    }

    /// Render every instrument in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP streamrelay_tokens_total Tokens consumed by all exchanges.");
        let _ = writeln!(out, "# TYPE streamrelay_tokens_total counter");
        let _ = writeln!(out, "streamrelay_tokens_total {}", self.total_tokens());

        let _ = writeln!(out, "# HELP streamrelay_active_exchanges Exchanges currently in flight.");
        let _ = writeln!(out, "# TYPE streamrelay_active_exchanges gauge");
        let _ = writeln!(out, "streamrelay_active_exchanges {}", self.active_exchanges());

        let _ = writeln!(
            out,
            "# HELP streamrelay_exchange_duration_seconds Wall time of finished exchanges."
        );
        let _ = writeln!(out, "# TYPE streamrelay_exchange_duration_seconds histogram");
        self.duration
            .render_prometheus("streamrelay_exchange_duration_seconds", &mut out);
        out
    }
}

impl Default for ExchangeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for ExchangeMetrics {
    fn add_tokens(&self, tokens: u64) {
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    fn observe_exchange_duration(&self, secs: f64) {
        self.duration.observe(secs);
    }

    fn exchange_active(&self, delta: i64) {
        let now = self.active_exchanges.fetch_add(delta, Ordering::Relaxed) + delta;
        tracing::trace!(active = now, "Active exchanges changed");
    }
}
