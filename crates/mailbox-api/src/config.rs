//! HTTP front configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port of the HTTP front.
pub const DEFAULT_PORT: u16 = 7380;

/// Main API configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address
    pub host: IpAddr,
    /// Bind port
    pub port: u16,
    /// How long a submit may wait for the rack to accept a message
    #[serde(with = "humantime_serde")]
    pub submit_timeout: Duration,
    /// How long a collect waits before answering 204
    #[serde(with = "humantime_serde")]
    pub collect_timeout: Duration,
    /// Concurrent collects allowed per inbox
    pub max_listeners_per_inbox: usize,
    /// Largest accepted request body in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            submit_timeout: Duration::from_secs(1),
            collect_timeout: Duration::from_secs(30),
            max_listeners_per_inbox: 5,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MAILBOX_API_HOST`: bind address (default: 127.0.0.1)
    /// - `MAILBOX_API_PORT`: bind port (default: 7380)
    /// - `MAILBOX_API_SUBMIT_TIMEOUT`: e.g. `1s`, `500ms` (default: 1s)
    /// - `MAILBOX_API_COLLECT_TIMEOUT`: e.g. `30s`, `2m` (default: 30s)
    /// - `MAILBOX_API_MAX_LISTENERS`: concurrent collects per inbox (default: 5)
    /// - `MAILBOX_API_MAX_BODY_SIZE`: bytes (default: 1 MiB)
    ///
    /// Unset variables keep their defaults; set but malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_var("MAILBOX_API_HOST") {
            config.host = host
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MAILBOX_API_HOST={host}")))?;
        }
        if let Some(port) = env_var("MAILBOX_API_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MAILBOX_API_PORT={port}")))?;
        }
        if let Some(timeout) = env_var("MAILBOX_API_SUBMIT_TIMEOUT") {
            config.submit_timeout = humantime_serde::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidTimeout(format!("submit: {e}")))?;
        }
        if let Some(timeout) = env_var("MAILBOX_API_COLLECT_TIMEOUT") {
            config.collect_timeout = humantime_serde::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidTimeout(format!("collect: {e}")))?;
        }
        if let Some(limit) = env_var("MAILBOX_API_MAX_LISTENERS") {
            config.max_listeners_per_inbox = limit.parse().map_err(|_| {
                ConfigError::InvalidLimit(format!("MAILBOX_API_MAX_LISTENERS={limit}"))
            })?;
        }
        if let Some(size) = env_var("MAILBOX_API_MAX_BODY_SIZE") {
            config.max_body_size = size.parse().map_err(|_| {
                ConfigError::InvalidLimit(format!("MAILBOX_API_MAX_BODY_SIZE={size}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.submit_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "submit timeout cannot be 0".into(),
            ));
        }

        if self.collect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "collect timeout cannot be 0".into(),
            ));
        }

        if self.max_listeners_per_inbox == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_listeners_per_inbox cannot be 0".into(),
            ));
        }

        if self.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_body_size cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get server bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(|_| "invalid minutes")?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("minutes out of range")
        } else {
            // Plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
