//! # Undelivered Message Cache
//!
//! Holds messages that arrived while nobody was waiting for their address.
//!
//! ## Design
//!
//! - Entries expire `retention` after they were cached
//! - Expired entries are swept lazily, only when the cache is touched
//! - The cache never grows past `capacity` live entries; overflow is dropped
//! - Entries are kept in arrival order, so a claim returns the oldest match

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use mailbox_types::{Address, Message};

/// A cached message and the instant it stops being claimable.
#[derive(Debug)]
struct CachedMessage {
    message: Arc<Message>,
    expires_at: Instant,
}

/// Time- and capacity-bounded holding area for undelivered messages.
///
/// Owned exclusively by a rack's coordinating task.
#[derive(Debug)]
pub struct UndeliveredCache {
    /// Entries in arrival order. Retention is fixed, so expiry order matches.
    entries: VecDeque<CachedMessage>,

    /// How long an entry stays claimable.
    retention: Duration,

    /// Maximum live entries.
    capacity: usize,
}

impl UndeliveredCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention,
            capacity,
        }
    }

    /// Remove every entry expired at `now`. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.expires_at <= now)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Cache `message` until `now + retention`.
    ///
    /// Returns `false`, leaving the cache untouched, when it is already full.
    /// Callers sweep first so that only live entries count against capacity.
    pub fn insert(&mut self, message: Arc<Message>, now: Instant) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push_back(CachedMessage {
            message,
            expires_at: now + self.retention,
        });
        true
    }

    /// Find the oldest entry addressed to `address`.
    ///
    /// The entry stays cached until [`Claim::commit`] is called, so a failed
    /// hand-over leaves it in place.
    pub fn claim(&mut self, address: &Address) -> Option<Claim<'_>> {
        let (index, entry) = self
            .entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.message.to == *address)?;
        let message = Arc::clone(&entry.message);
        Some(Claim {
            cache: self,
            index,
            message,
        })
    }

    /// Number of cached entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// The capacity bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A pending claim on a cached message.
pub struct Claim<'a> {
    cache: &'a mut UndeliveredCache,
    index: usize,
    message: Arc<Message>,
}

impl Claim<'_> {
    /// The claimed message.
    #[must_use]
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Remove the claimed entry from the cache.
    pub fn commit(self) -> Arc<Message> {
        self.cache.entries.remove(self.index);
        self.message
    }
}
