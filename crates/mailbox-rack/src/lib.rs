//! # Mailbox Rack - In-Process Message Broker
//!
//! Routes addressed messages between producers and consumers that never
//! meet directly.
//!
//! ## Operations
//!
//! - **deliver**: submit a message; it goes to one waiting consumer of its
//!   address, or into the undelivered cache for the retention period.
//! - **take**: wait for the next message to one address.
//! - **tail**: observe a copy of every message, best-effort.
//! - **close**: stop the broker; blocked callers are released.
//!
//! ## Flow
//!
//! ```text
//!  deliver() ──┐                             ┌──→ follower streams (copies)
//!              │     ┌──────────────────┐    │
//!  take() ─────┼───→ │ coordinating task│ ───┼──→ one waiting take()
//!              │     │  (owns all state)│    │
//!  tail() ─────┘     └──────────────────┘    └──→ undelivered cache
//! ```
//!
//! ## Guarantees
//!
//! - **At most one consumer** receives any message.
//! - **Followers** see messages in routing order, minus what overflowed
//!   their own buffer. A slow follower never slows the rack down.
//! - **Shutdown** never leaves a caller blocked.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

use std::time::Duration;

pub mod cache;
pub mod config;
pub mod context;
mod coordinator;
pub mod errors;
pub mod follower;
pub mod rack;

// Re-export main types
pub use cache::UndeliveredCache;
pub use config::RackConfig;
pub use context::{Context, ContextError};
pub use coordinator::RackStats;
pub use errors::RackError;
pub use follower::{FollowerError, FollowerStream};
pub use rack::{Mailbox, Rack};

/// Messages that may wait between `deliver` and the coordinating task.
pub const DELIVERY_QUEUE_CAPACITY: usize = 1000;

/// Consumer and stats queues hold this many entries per CPU.
pub const REGISTRATION_QUEUE_FACTOR: usize = 2;

/// Undelivered messages held at once; the excess is dropped.
pub const CACHE_CAPACITY: usize = 1000;

/// How long an undelivered message waits for a consumer.
pub const RETENTION: Duration = Duration::from_secs(60);
