//! Prometheus metrics for the offline proxy
//!
//! Every collector is registered on a [`Registry`] owned by [`ProxyMetrics`],
//! which the metrics endpoint encodes on demand.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::time::Duration;

const NAMESPACE: &str = "offline_proxy";

/// Metrics collector for the offline proxy
#[derive(Clone)]
pub struct ProxyMetrics {
    registry: Registry,

    /// Requests by route (write, large_object, static, passthrough)
    requests_total: IntCounterVec,

    /// Response cache events (hit, miss, store, error)
    cache_events_total: IntCounterVec,

    /// Last-resort fallback responses served
    fallbacks_total: IntCounter,

    /// Full-object acquisitions by result (success, failure)
    chunk_downloads_total: IntCounterVec,

    /// Range responses by status (206, 416) plus network fallbacks
    range_responses_total: IntCounterVec,

    /// Bytes served out of stored chunks
    chunk_bytes_served_total: IntCounter,

    /// Replay results by outcome
    replay_outcomes_total: IntCounterVec,

    /// Write requests persisted for replay
    queue_enqueued_total: IntCounter,

    /// End-to-end handling time of routed requests
    request_duration_seconds: Histogram,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub write_requests: u64,
    pub large_object_requests: u64,
    pub static_requests: u64,
    pub passthrough_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_stores: u64,
    pub cache_errors: u64,
    pub fallbacks: u64,

    pub chunk_downloads_succeeded: u64,
    pub chunk_downloads_failed: u64,
    pub range_responses: u64,
    pub unsatisfiable_ranges: u64,
    pub range_network_fallbacks: u64,
    pub chunk_bytes_served: u64,

    pub replayed: u64,
    pub rejected: u64,
    pub retained: u64,
    pub unreachable: u64,
    pub corrupt: u64,
    pub enqueued: u64,
}

impl ProxyMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on the given registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total intercepted requests by route").namespace(NAMESPACE),
            &["route"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let cache_events_total = IntCounterVec::new(
            Opts::new("cache_events_total", "Response cache events").namespace(NAMESPACE),
            &["event"],
        )?;
        registry.register(Box::new(cache_events_total.clone()))?;

        let fallbacks_total = IntCounter::with_opts(
            Opts::new("fallbacks_total", "Fallback responses served while offline")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(fallbacks_total.clone()))?;

        let chunk_downloads_total = IntCounterVec::new(
            Opts::new("chunk_downloads_total", "Large object acquisitions by result")
                .namespace(NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(chunk_downloads_total.clone()))?;

        let range_responses_total = IntCounterVec::new(
            Opts::new("range_responses_total", "Range requests answered by the chunk store")
                .namespace(NAMESPACE),
            &["status"],
        )?;
        registry.register(Box::new(range_responses_total.clone()))?;

        let chunk_bytes_served_total = IntCounter::with_opts(
            Opts::new("chunk_bytes_served_total", "Bytes served from stored chunks")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(chunk_bytes_served_total.clone()))?;

        let replay_outcomes_total = IntCounterVec::new(
            Opts::new("replay_outcomes_total", "Queued write replays by outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(replay_outcomes_total.clone()))?;

        let queue_enqueued_total = IntCounter::with_opts(
            Opts::new("queue_enqueued_total", "Write requests queued for replay")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(queue_enqueued_total.clone()))?;

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "Request handling time in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_events_total,
            fallbacks_total,
            chunk_downloads_total,
            range_responses_total,
            chunk_bytes_served_total,
            replay_outcomes_total,
            queue_enqueued_total,
            request_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, route: &str) {
        self.requests_total.with_label_values(&[route]).inc();
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.request_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_cache_hit(&self) {
        self.cache_events_total.with_label_values(&["hit"]).inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_events_total.with_label_values(&["miss"]).inc();
    }

    pub fn record_cache_store(&self) {
        self.cache_events_total.with_label_values(&["store"]).inc();
    }

    pub fn record_cache_error(&self) {
        self.cache_events_total.with_label_values(&["error"]).inc();
    }

    pub fn record_fallback(&self) {
        self.fallbacks_total.inc();
    }

    pub fn record_chunk_download(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.chunk_downloads_total.with_label_values(&[result]).inc();
    }

    /// Record a range response served from chunks
    pub fn record_range_response(&self, bytes: u64) {
        self.range_responses_total.with_label_values(&["206"]).inc();
        self.chunk_bytes_served_total.inc_by(bytes);
    }

    pub fn record_unsatisfiable_range(&self) {
        self.range_responses_total.with_label_values(&["416"]).inc();
    }

    /// Record a range request that had to go back to the network
    pub fn record_range_fallback(&self) {
        self.range_responses_total.with_label_values(&["network"]).inc();
    }

    pub fn record_replay_outcome(&self, outcome: &str) {
        self.replay_outcomes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_enqueue(&self) {
        self.queue_enqueued_total.inc();
    }

    /// Get a snapshot of the current counter values
    pub fn get_stats(&self) -> MetricsSnapshot {
        let requests = |route: &str| self.requests_total.with_label_values(&[route]).get();
        let cache = |event: &str| self.cache_events_total.with_label_values(&[event]).get();
        let downloads = |result: &str| self.chunk_downloads_total.with_label_values(&[result]).get();
        let ranges = |status: &str| self.range_responses_total.with_label_values(&[status]).get();
        let replays = |outcome: &str| self.replay_outcomes_total.with_label_values(&[outcome]).get();

        MetricsSnapshot {
            write_requests: requests("write"),
            large_object_requests: requests("large_object"),
            static_requests: requests("static"),
            passthrough_requests: requests("passthrough"),
            cache_hits: cache("hit"),
            cache_misses: cache("miss"),
            cache_stores: cache("store"),
            cache_errors: cache("error"),
            fallbacks: self.fallbacks_total.get(),
            chunk_downloads_succeeded: downloads("success"),
            chunk_downloads_failed: downloads("failure"),
            range_responses: ranges("206"),
            unsatisfiable_ranges: ranges("416"),
            range_network_fallbacks: ranges("network"),
            chunk_bytes_served: self.chunk_bytes_served_total.get(),
            replayed: replays("replayed"),
            rejected: replays("rejected"),
            retained: replays("retained"),
            unreachable: replays("unreachable"),
            corrupt: replays("corrupt"),
            enqueued: self.queue_enqueued_total.get(),
        }
    }

}
