use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Engine`](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Current number of ranges in flight
    pub machines: Gauge,
    /// Height of the chain head
    pub head: Gauge,
    /// Highest head advertised by a peer
    pub target: Gauge,
    /// Number of range requests sent
    pub requests: Counter,
    /// Number of responses accepted
    pub responses_valid: Counter,
    /// Number of responses that were empty or malformed
    pub responses_invalid: Counter,
    /// Number of responses that did not match an outstanding request
    pub responses_stale: Counter,
    /// Number of requests that timed out
    pub timeouts: Counter,
    /// Number of ticks where every range in flight was skipped
    pub stalls: Counter,
    /// Number of blocks inserted into the chain
    pub blocks_inserted: Counter,
    /// Number of ranges rejected by the chain
    pub ranges_rejected: Counter,
    /// Number of idle ranges dropped because they end past the target
    pub ranges_trimmed: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "machines",
            "Current number of ranges in flight",
            metrics.machines.clone(),
        );
        context.register("head", "Height of the chain head", metrics.head.clone());
        context.register(
            "target",
            "Highest head advertised by a peer",
            metrics.target.clone(),
        );
        context.register(
            "requests",
            "Number of range requests sent",
            metrics.requests.clone(),
        );
        context.register(
            "responses_valid",
            "Number of responses accepted",
            metrics.responses_valid.clone(),
        );
        context.register(
            "responses_invalid",
            "Number of responses that were empty or malformed",
            metrics.responses_invalid.clone(),
        );
        context.register(
            "responses_stale",
            "Number of responses that did not match an outstanding request",
            metrics.responses_stale.clone(),
        );
        context.register(
            "timeouts",
            "Number of requests that timed out",
            metrics.timeouts.clone(),
        );
        context.register(
            "stalls",
            "Number of ticks where every range in flight was skipped",
            metrics.stalls.clone(),
        );
        context.register(
            "blocks_inserted",
            "Number of blocks inserted into the chain",
            metrics.blocks_inserted.clone(),
        );
        context.register(
            "ranges_rejected",
            "Number of ranges rejected by the chain",
            metrics.ranges_rejected.clone(),
        );
        context.register(
            "ranges_trimmed",
            "Number of idle ranges dropped because they end past the target",
            metrics.ranges_trimmed.clone(),
        );
        metrics
    }
}
