//! Metrics for [crate::BlockCache].

use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for [crate::BlockCache].
#[derive(Default)]
pub(crate) struct Metrics {
    /// Acquisitions served by a resident slot.
    pub hits: Counter,
    /// Acquisitions that had to claim a slot.
    pub misses: Counter,
    /// Resident identities displaced to serve a miss.
    pub evictions: Counter,
    /// Transport loads issued.
    pub loads: Counter,
    /// Transport stores issued.
    pub stores: Counter,
    /// Currently outstanding pins.
    pub pinned: Gauge,
}

impl Metrics {
    /// Create and register metrics with the given context.
    ///
    /// Metric names will be prefixed with the context's label.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "hits",
            "Acquisitions served by a resident slot",
            metrics.hits.clone(),
        );
        context.register(
            "misses",
            "Acquisitions that had to claim a slot",
            metrics.misses.clone(),
        );
        context.register(
            "evictions",
            "Resident identities displaced to serve a miss",
            metrics.evictions.clone(),
        );
        context.register("loads", "Transport loads issued", metrics.loads.clone());
        context.register("stores", "Transport stores issued", metrics.stores.clone());
        context.register(
            "pinned",
            "Currently outstanding pins",
            metrics.pinned.clone(),
        );
        metrics
    }
}
