//! # Coordinating Task
//!
//! The single task that owns every piece of mutable rack state: followers,
//! waiting consumers and the undelivered cache. Callers reach it only
//! through channels, so each state transition happens in exactly one place
//! and in one order.
//!
//! ## Transitions
//!
//! ```text
//! closed signal ───────────→ exit; drop every follower and consumer channel
//! consumer request ────────→ sweep cache → hand over cached match, or wait
//! drop request ────────────→ forget the waiter (no-op if already gone)
//! follower request ────────→ add to the fan-out set
//! delivered message ───────→ fan out → first live waiter, or cache
//! stats request ───────────→ route queued deliveries, report counts
//! ```
//!
//! Before a delivered message or a stats request is handled, the loop drains
//! every registration that is already queued, so a `tail`, `take` or
//! cancellation that completed before a `deliver` call is always visible to
//! that delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use mailbox_telemetry::metrics::{
    RACK_CACHED, RACK_CACHE_HITS, RACK_CONSUMERS, RACK_FOLLOWERS, RACK_FOLLOWER_DROPS,
    RACK_MESSAGES_ACCEPTED, RACK_MESSAGES_CACHED, RACK_MESSAGES_DROPPED, RACK_MESSAGES_MATCHED,
};
use mailbox_types::{Address, Message};

use crate::cache::UndeliveredCache;
use crate::config::RackConfig;

/// A `take` call asking for the next message to `address`.
#[derive(Debug)]
pub(crate) struct ConsumerRequest {
    pub id: u64,
    pub address: Address,
    pub output: oneshot::Sender<Arc<Message>>,
}

/// Revocation of a consumer registration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DropRequest {
    pub id: u64,
    pub address: Address,
}

/// Point-in-time counts of the state owned by a rack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RackStats {
    /// Registered followers.
    pub followers: usize,
    /// Consumers waiting in `take`.
    pub consumers: usize,
    /// Messages in the undelivered cache.
    pub cached: usize,
}

/// A registered consumer.
#[derive(Debug)]
struct Waiter {
    id: u64,
    output: oneshot::Sender<Arc<Message>>,
}

/// State owned by the coordinating task.
#[derive(Debug)]
pub(crate) struct RackState {
    followers: Vec<mpsc::Sender<Arc<Message>>>,
    /// Waiters per address, longest-waiting first.
    consumers: HashMap<Address, VecDeque<Waiter>>,
    /// Total waiters across every address.
    consumer_count: usize,
    cache: UndeliveredCache,
}

impl RackState {
    pub(crate) fn new(config: &RackConfig) -> Self {
        Self {
            followers: Vec::new(),
            consumers: HashMap::new(),
            consumer_count: 0,
            cache: UndeliveredCache::new(config.retention, config.cache_capacity),
        }
    }

    /// Satisfy a consumer from the cache or register it.
    pub(crate) fn register_consumer(&mut self, request: ConsumerRequest, now: Instant) {
        self.sweep(now);

        let ConsumerRequest {
            id,
            address,
            output,
        } = request;

        if output.is_closed() {
            trace!(consumer = id, %address, "Consumer left before registration");
            return;
        }

        if let Some(claim) = self.cache.claim(&address) {
            match output.send(Arc::clone(claim.message())) {
                Ok(()) => {
                    let message = claim.commit();
                    RACK_CACHE_HITS.inc();
                    debug!(consumer = id, %address, message_id = %message.id, "Consumer satisfied from cache");
                }
                Err(_) => {
                    trace!(consumer = id, %address, "Consumer left before cached message was handed over");
                }
            }
            return;
        }

        self.consumers
            .entry(address)
            .or_default()
            .push_back(Waiter { id, output });
        self.consumer_count += 1;
        debug!(consumer = id, %address, "Consumer registered");
    }

    /// Forget a consumer. Unknown ids are ignored.
    pub(crate) fn drop_consumer(&mut self, request: DropRequest) {
        let Some(waiters) = self.consumers.get_mut(&request.address) else {
            return;
        };
        let before = waiters.len();
        waiters.retain(|waiter| waiter.id != request.id);
        let removed = before - waiters.len();
        self.consumer_count -= removed;
        if removed > 0 {
            trace!(consumer = request.id, address = %request.address, "Consumer dropped");
        }
        if waiters.is_empty() {
            self.consumers.remove(&request.address);
        }
    }

    pub(crate) fn add_follower(&mut self, follower: mpsc::Sender<Arc<Message>>) {
        self.followers.push(follower);
        debug!(followers = self.followers.len(), "Follower registered");
    }

    /// Fan a message out to followers, then hand it to one waiter or cache it.
    pub(crate) fn route(&mut self, message: Arc<Message>, now: Instant) {
        RACK_MESSAGES_ACCEPTED.inc();
        self.fan_out(&message);

        if self.match_consumer(&message) {
            RACK_MESSAGES_MATCHED.inc();
            debug!(message_id = %message.id, to = %message.to, "Message matched to consumer");
            return;
        }

        self.sweep(now);
        let message_id = message.id;
        let to = message.to;
        if self.cache.insert(message, now) {
            RACK_MESSAGES_CACHED.inc();
            debug!(%message_id, %to, cached = self.cache.len(), "Message cached");
        } else {
            RACK_MESSAGES_DROPPED.with_label_values(&["cache_full"]).inc();
            debug!(%message_id, %to, "Undelivered cache full, message dropped");
        }
    }

    /// Copy a message to every follower without waiting on any of them.
    fn fan_out(&mut self, message: &Arc<Message>) {
        self.followers
            .retain(|follower| match follower.try_send(Arc::clone(message)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    RACK_FOLLOWER_DROPS.inc();
                    trace!(message_id = %message.id, "Follower lagging, copy dropped");
                    true
                }
                // The stream was dropped; nobody can read this follower again.
                Err(TrySendError::Closed(_)) => false,
            });
    }

    /// Hand the message to the longest-waiting live consumer of its address.
    ///
    /// Waiters whose `take` already returned are discarded on the way. At
    /// most one consumer receives the message.
    fn match_consumer(&mut self, message: &Arc<Message>) -> bool {
        let to = message.to;
        let Some(waiters) = self.consumers.get_mut(&to) else {
            return false;
        };

        let mut delivered = false;
        while let Some(waiter) = waiters.pop_front() {
            self.consumer_count -= 1;
            if waiter.output.send(Arc::clone(message)).is_ok() {
                delivered = true;
                break;
            }
            trace!(consumer = waiter.id, %to, "Skipping consumer that already left");
        }

        if waiters.is_empty() {
            self.consumers.remove(&to);
        }
        delivered
    }

    fn sweep(&mut self, now: Instant) {
        let expired = self.cache.sweep(now);
        if expired > 0 {
            RACK_MESSAGES_DROPPED
                .with_label_values(&["expired"])
                .inc_by(expired as f64);
            debug!(expired, "Expired undelivered messages");
        }
    }

    pub(crate) fn stats(&self) -> RackStats {
        RackStats {
            followers: self.followers.len(),
            consumers: self.consumer_count,
            cached: self.cache.len(),
        }
    }

    fn publish_gauges(&self) {
        let stats = self.stats();
        RACK_FOLLOWERS.set(stats.followers as f64);
        RACK_CONSUMERS.set(stats.consumers as f64);
        RACK_CACHED.set(stats.cached as f64);
    }

    /// Drop every channel the rack still holds, ending every follower stream
    /// and failing every pending `take`.
    pub(crate) fn shutdown(&mut self) -> RackStats {
        let stats = self.stats();
        self.followers.clear();
        self.consumers.clear();
        self.consumer_count = 0;
        self.cache.clear();
        self.publish_gauges();
        stats
    }
}

/// Receiving ends of the channels that feed the coordinating task.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub deliveries: mpsc::Receiver<Arc<Message>>,
    pub new_consumers: mpsc::Receiver<ConsumerRequest>,
    pub drop_consumers: mpsc::UnboundedReceiver<DropRequest>,
    pub new_followers: mpsc::UnboundedReceiver<mpsc::Sender<Arc<Message>>>,
    pub stats_requests: mpsc::Receiver<oneshot::Sender<RackStats>>,
    pub closed: watch::Receiver<bool>,
}

/// The coordinating task of one rack.
#[derive(Debug)]
pub(crate) struct Coordinator {
    inbound: Inbound,
    state: RackState,
    /// Upper bound on deliveries routed while answering one stats request.
    flush_limit: usize,
}

impl Coordinator {
    pub(crate) fn new(inbound: Inbound, config: &RackConfig) -> Self {
        Self {
            inbound,
            state: RackState::new(config),
            flush_limit: config.delivery_capacity,
        }
    }

    /// Run until the rack is closed or every handle is gone.
    pub(crate) async fn run(mut self) {
        info!("Rack loop started");

        loop {
            tokio::select! {
                () = wait_closed(&mut self.inbound.closed) => break,

                Some(request) = self.inbound.new_consumers.recv() => {
                    self.state.register_consumer(request, Instant::now());
                }

                Some(request) = self.inbound.drop_consumers.recv() => {
                    self.state.drop_consumer(request);
                }

                Some(follower) = self.inbound.new_followers.recv() => {
                    self.state.add_follower(follower);
                }

                Some(message) = self.inbound.deliveries.recv() => {
                    self.deliver(message);
                }

                Some(reply) = self.inbound.stats_requests.recv() => {
                    self.drain_registrations();
                    self.flush_deliveries();
                    // The caller may have given up waiting.
                    let _ = reply.send(self.state.stats());
                }

                else => break,
            }
            self.state.publish_gauges();
        }

        let residual = self.state.shutdown();
        info!(
            followers = residual.followers,
            consumers = residual.consumers,
            cached = residual.cached,
            "Rack loop stopped"
        );
    }

    /// Apply every queued registration: consumers, then drops, then followers.
    fn drain_registrations(&mut self) {
        let now = Instant::now();
        while let Ok(request) = self.inbound.new_consumers.try_recv() {
            self.state.register_consumer(request, now);
        }
        while let Ok(request) = self.inbound.drop_consumers.try_recv() {
            self.state.drop_consumer(request);
        }
        while let Ok(follower) = self.inbound.new_followers.try_recv() {
            self.state.add_follower(follower);
        }
    }

    /// Route one message taken off the delivery queue.
    ///
    /// Registrations are drained after the message was received, so every
    /// registration sent before the matching `deliver` call is applied first.
    fn deliver(&mut self, message: Arc<Message>) {
        self.drain_registrations();
        self.state.route(message, Instant::now());
    }

    /// Route deliveries that were accepted before a stats request arrived,
    /// so the answer reflects them.
    fn flush_deliveries(&mut self) {
        for _ in 0..self.flush_limit {
            let Ok(message) = self.inbound.deliveries.try_recv() else {
                break;
            };
            self.deliver(message);
        }
    }
}

/// Resolve once the rack is closed or its handle is gone.
pub(crate) async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}
