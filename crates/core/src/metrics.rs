//! Metrics sink seam.

/// Where exchange-level measurements go.
///
/// Implementations must be safe to share across concurrent exchanges; the
/// token counter in particular is updated with an atomic add.
pub trait MetricsSink: Send + Sync {
    /// Add consumed tokens to the process-wide total.
    fn add_tokens(&self, tokens: u64);

    /// Record how long one exchange took.
    fn observe_exchange_duration(&self, secs: f64);

    /// An exchange started (`+1`) or ended (`-1`).
    fn exchange_active(&self, _delta: i64) {}
}

/// A sink that discards everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn add_tokens(&self, _tokens: u64) {}

    fn observe_exchange_duration(&self, _secs: f64) {}
}
