//! Per-inbox admission control for collects.
//!
//! The rack itself accepts any number of consumers per address; this caps
//! how many HTTP collects may wait on one inbox at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use mailbox_types::Address;

/// Counts active collects per inbox.
#[derive(Debug)]
pub struct ListenerRegistry {
    active: DashMap<Address, usize>,
    limit: usize,
}

impl ListenerRegistry {
    /// Allow at most `limit` concurrent listeners per inbox.
    pub fn new(limit: usize) -> Self {
        Self {
            active: DashMap::new(),
            limit,
        }
    }

    /// Reserve a listener slot on `address`, or `None` when it is full.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn try_acquire(self: &Arc<Self>, address: Address) -> Option<ListenerGuard> {
        let mut count = self.active.entry(address).or_insert(0);
        if *count >= self.limit {
            return None;
        }
        *count += 1;
        drop(count);

        Some(ListenerGuard {
            registry: Arc::clone(self),
            address,
        })
    }

    /// Listeners currently waiting on `address`.
    pub fn active(&self, address: &Address) -> usize {
        self.active.get(address).map_or(0, |count| *count)
    }

    /// Inboxes with at least one listener.
    pub fn inboxes(&self) -> usize {
        self.active.len()
    }

    fn release(&self, address: Address) {
        if let Entry::Occupied(mut entry) = self.active.entry(address) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }
}

/// A reserved listener slot.
#[derive(Debug)]
pub struct ListenerGuard {
    registry: Arc<ListenerRegistry>,
    address: Address,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry.release(self.address);
    }
}
