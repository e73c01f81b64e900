//! Request telemetry on a Prometheus registry.
//!
//! Counts requests by outcome and cache-hit flag, buckets response times by
//! cache-hit flag, and tracks the admission queue depth. Every observation is
//! also emitted as a `tracing` event under the `awardsearch::telemetry` target.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tracing::{debug, info};

/// Histogram upper bounds in milliseconds; a final `+Inf` bucket follows.
pub const RESPONSE_TIME_BUCKETS_MS: [f64; 8] =
    [100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0];

/// Outcome label for the request counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Success,
    QueueFull,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::QueueFull => "queue_full",
            Self::Error => "error",
        }
    }
}

// ── Label types ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabel {
    pub status: String,
    pub cache_hit: String,
}

impl RequestLabel {
    fn new(status: RequestStatus, cache_hit: bool) -> Self {
        Self {
            status: status.as_str().to_string(),
            cache_hit: cache_hit.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CacheLabel {
    pub cache_hit: String,
}

// ── Metrics registry ───────────────────────────────────────────────────────────

/// Metrics owned by one service instance.
#[derive(Debug)]
pub struct Telemetry {
    registry: Registry,
    requests: Family<RequestLabel, Counter>,
    response_time: Family<CacheLabel, Histogram>,
    queue_depth: Gauge,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests: Family<RequestLabel, Counter> = Family::default();
        registry.register(
            "awardsearch_requests",
            "Search requests by outcome and cache hit",
            requests.clone(),
        );

        let response_time: Family<CacheLabel, Histogram> = Family::new_with_constructor(|| {
            Histogram::new(RESPONSE_TIME_BUCKETS_MS.into_iter())
        });
        registry.register(
            "awardsearch_response_time_ms",
            "Search response time in milliseconds by cache hit",
            response_time.clone(),
        );

        let queue_depth: Gauge = Gauge::default();
        registry.register(
            "awardsearch_queue_depth",
            "Searches admitted but not yet executing",
            queue_depth.clone(),
        );

        Self {
            registry,
            requests,
            response_time,
            queue_depth,
        }
    }

    /// Count one finished request and record its latency.
    pub fn record_request(&self, status: RequestStatus, cache_hit: bool, response_time_ms: u64) {
        self.requests
            .get_or_create(&RequestLabel::new(status, cache_hit))
            .inc();
        self.response_time
            .get_or_create(&CacheLabel {
                cache_hit: cache_hit.to_string(),
            })
            .observe(response_time_ms as f64);
        info!(
            target: "awardsearch::telemetry",
            status = status.as_str(),
            cache_hit,
            response_time_ms,
            "search request recorded"
        );
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
        debug!(target: "awardsearch::telemetry", queue_depth = depth, "queue depth sampled");
    }

    /// Requests recorded so far with this outcome and cache flag.
    pub fn requests_for(&self, status: RequestStatus, cache_hit: bool) -> u64 {
        self.requests
            .get_or_create(&RequestLabel::new(status, cache_hit))
            .get()
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// The registry in Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let mut out = String::new();
        if encode(&mut out, &self.registry).is_err() {
            out.clear();
        }
        out
    }
}
