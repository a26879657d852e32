//! Mailbox API - HTTP front for a mailbox rack.
//!
//! Exposes one inbox per address over plain HTTP so that actors outside the
//! process can submit and collect messages.
//!
//! # Architecture
//!
//! ```text
//!  MailboxClient ──HTTP──→ ┌──────────────────────────────┐
//!                          │  Router (trace, body limit)  │
//!                          │     │                │       │
//!                          │  submit         collect      │
//!                          │     │      admission control │
//!                          └─────┼────────────────┼───────┘
//!                                ▼                ▼
//!                         Mailbox::deliver   Mailbox::take
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mailbox_api::{ApiConfig, MailboxApiService};
//!
//! let service = MailboxApiService::new(ApiConfig::default(), Arc::new(rack))?;
//! service.start(shutdown_signal).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod service;

// Re-exports for public API
pub use admission::{ListenerGuard, ListenerRegistry};
pub use client::{ClientError, MailboxClient};
pub use config::{ApiConfig, ConfigError, DEFAULT_PORT};
pub use error::{ApiError, ServiceError};
pub use service::MailboxApiService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
