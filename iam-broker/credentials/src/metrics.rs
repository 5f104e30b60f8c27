use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct CacheMetrics {
    pub(crate) hits: Counter,
    pub(crate) misses: Counter,
    pub(crate) issue_errors: Counter,
    pub(crate) expired: Counter,
    pub(crate) expiring_dropped: Counter,
    pub(crate) size: Gauge,
}

#[derive(Clone, Debug, Default)]
pub struct PrefetchMetrics {
    pub(crate) fetches: Family<OpLabels, Counter>,
    pub(crate) errors: Family<OpLabels, Counter>,
    pub(crate) renewals_skipped: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct OpLabels {
    op: Op,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum Op {
    Warmup,
    Renewal,
}

// === impl CacheMetrics ===

impl CacheMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let hits = Counter::default();
        reg.register(
            "hits",
            "Count of requests served by a cached or in-flight entry",
            hits.clone(),
        );

        let misses = Counter::default();
        reg.register(
            "misses",
            "Count of requests that started a credential fetch",
            misses.clone(),
        );

        let issue_errors = Counter::default();
        reg.register(
            "issue_errors",
            "Count of credential fetches that failed",
            issue_errors.clone(),
        );

        let expired = Counter::default();
        reg.register(
            "expired",
            "Count of entries evicted because their credentials expired",
            expired.clone(),
        );

        let expiring_dropped = Counter::default();
        reg.register(
            "expiring_dropped",
            "Count of expiry notifications dropped because the buffer was full",
            expiring_dropped.clone(),
        );

        let size = Gauge::default();
        reg.register("size", "The number of cached entries", size.clone());

        Self {
            hits,
            misses,
            issue_errors,
            expired,
            expiring_dropped,
            size,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    pub fn expiring_dropped(&self) -> u64 {
        self.expiring_dropped.get()
    }
}

// === impl PrefetchMetrics ===

impl PrefetchMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let fetches = Family::default();
        reg.register(
            "fetches",
            "Count of credential fetches started ahead of requests",
            fetches.clone(),
        );

        let errors = Family::default();
        reg.register(
            "errors",
            "Count of credential fetches started ahead of requests that failed",
            errors.clone(),
        );

        let renewals_skipped = Counter::default();
        reg.register(
            "renewals_skipped",
            "Count of expired credentials not renewed because no running pod uses the role",
            renewals_skipped.clone(),
        );

        Self {
            fetches,
            errors,
            renewals_skipped,
        }
    }

    pub(crate) fn fetch(&self, op: Op) {
        self.fetches.get_or_create(&OpLabels { op }).inc();
    }

    pub(crate) fn error(&self, op: Op) {
        self.errors.get_or_create(&OpLabels { op }).inc();
    }

    pub fn renewals_skipped(&self) -> u64 {
        self.renewals_skipped.get()
    }
}
