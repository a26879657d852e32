//! Prometheus metrics for the rack and its HTTP front.
//!
//! All metrics follow the naming convention: `mailbox_<component>_<metric>_<unit>`
//!
//! Gauges are process-wide: with several racks in one process they reflect
//! whichever rack updated them last.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // RACK METRICS
    // =========================================================================

    /// Messages taken off the delivery queue by a coordinating task
    pub static ref RACK_MESSAGES_ACCEPTED: Counter = Counter::new(
        "mailbox_rack_messages_accepted_total",
        "Total messages processed by the rack loop"
    ).expect("metric creation failed");

    /// Messages handed straight to a waiting consumer
    pub static ref RACK_MESSAGES_MATCHED: Counter = Counter::new(
        "mailbox_rack_messages_matched_total",
        "Total messages delivered to a waiting consumer"
    ).expect("metric creation failed");

    /// Messages parked in the undelivered cache
    pub static ref RACK_MESSAGES_CACHED: Counter = Counter::new(
        "mailbox_rack_messages_cached_total",
        "Total messages retained because no consumer was waiting"
    ).expect("metric creation failed");

    /// Consumers satisfied from the undelivered cache
    pub static ref RACK_CACHE_HITS: Counter = Counter::new(
        "mailbox_rack_cache_hits_total",
        "Total take calls satisfied from the undelivered cache"
    ).expect("metric creation failed");

    /// Messages dropped by the rack, by reason
    pub static ref RACK_MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("mailbox_rack_messages_dropped_total", "Total messages dropped by the rack"),
        &["reason"]  // reason: cache_full/expired
    ).expect("metric creation failed");

    /// Copies not delivered to a lagging follower
    pub static ref RACK_FOLLOWER_DROPS: Counter = Counter::new(
        "mailbox_rack_follower_drops_total",
        "Total message copies dropped because a follower buffer was full"
    ).expect("metric creation failed");

    /// Registered consumers
    pub static ref RACK_CONSUMERS: Gauge = Gauge::new(
        "mailbox_rack_consumers",
        "Consumers currently waiting"
    ).expect("metric creation failed");

    /// Registered followers
    pub static ref RACK_FOLLOWERS: Gauge = Gauge::new(
        "mailbox_rack_followers",
        "Followers currently tailing"
    ).expect("metric creation failed");

    /// Entries in the undelivered cache
    pub static ref RACK_CACHED: Gauge = Gauge::new(
        "mailbox_rack_cached_messages",
        "Messages currently held in the undelivered cache"
    ).expect("metric creation failed");

    // =========================================================================
    // API METRICS
    // =========================================================================

    /// HTTP requests served, by route and status
    pub static ref API_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("mailbox_api_requests_total", "Total HTTP requests served"),
        &["route", "status"]
    ).expect("metric creation failed");

    /// Collect calls rejected by per-inbox admission control
    pub static ref API_COLLECT_REJECTED: Counter = Counter::new(
        "mailbox_api_collect_rejected_total",
        "Total collect requests rejected for exceeding the listener cap"
    ).expect("metric creation failed");
}

/// Handle to the registered metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// The registry the metrics live in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Registering twice is harmless: already-registered collectors are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Rack
        Box::new(RACK_MESSAGES_ACCEPTED.clone()),
        Box::new(RACK_MESSAGES_MATCHED.clone()),
        Box::new(RACK_MESSAGES_CACHED.clone()),
        Box::new(RACK_CACHE_HITS.clone()),
        Box::new(RACK_MESSAGES_DROPPED.clone()),
        Box::new(RACK_FOLLOWER_DROPS.clone()),
        Box::new(RACK_CONSUMERS.clone()),
        Box::new(RACK_FOLLOWERS.clone()),
        Box::new(RACK_CACHED.clone()),
        // API
        Box::new(API_REQUESTS.clone()),
        Box::new(API_COLLECT_REJECTED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
