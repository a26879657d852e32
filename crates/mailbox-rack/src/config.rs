//! Rack sizing and retention.

use std::env;
use std::time::Duration;

use crate::{CACHE_CAPACITY, DELIVERY_QUEUE_CAPACITY, REGISTRATION_QUEUE_FACTOR, RETENTION};

/// Capacities and retention window of a rack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RackConfig {
    /// Slack between producers and the coordinating task.
    pub delivery_capacity: usize,

    /// Queue depth for consumer registrations and stats requests.
    pub registration_capacity: usize,

    /// Maximum live entries in the undelivered cache.
    pub cache_capacity: usize,

    /// How long an undelivered message waits for a consumer.
    pub retention: Duration,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            delivery_capacity: DELIVERY_QUEUE_CAPACITY,
            registration_capacity: num_cpus::get() * REGISTRATION_QUEUE_FACTOR,
            cache_capacity: CACHE_CAPACITY,
            retention: RETENTION,
        }
    }
}

impl RackConfig {
    /// Create configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    ///
    /// # Environment Variables
    ///
    /// - `MAILBOX_RACK_DELIVERY_CAPACITY` (default: 1000)
    /// - `MAILBOX_RACK_REGISTRATION_CAPACITY` (default: 2 x CPUs)
    /// - `MAILBOX_RACK_CACHE_CAPACITY` (default: 1000)
    /// - `MAILBOX_RACK_RETENTION_SECS` (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            delivery_capacity: env_parse("MAILBOX_RACK_DELIVERY_CAPACITY")
                .unwrap_or(defaults.delivery_capacity),
            registration_capacity: env_parse("MAILBOX_RACK_REGISTRATION_CAPACITY")
                .unwrap_or(defaults.registration_capacity),
            cache_capacity: env_parse("MAILBOX_RACK_CACHE_CAPACITY")
                .unwrap_or(defaults.cache_capacity),
            retention: env_parse("MAILBOX_RACK_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
        }
    }

    /// Set the retention window.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the undelivered cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the delivery queue capacity.
    #[must_use]
    pub fn with_delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity;
        self
    }

    /// Channel capacities must be positive; zero becomes one.
    #[must_use]
    pub(crate) fn normalized(mut self) -> Self {
        self.delivery_capacity = self.delivery_capacity.max(1);
        self.registration_capacity = self.registration_capacity.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
