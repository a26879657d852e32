//! # Rack Handle
//!
//! The public face of the broker. A [`Rack`] owns the sending halves of the
//! channels that feed its coordinating task and nothing else; every
//! operation is a message to that task.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use mailbox_types::{Address, Message};

use crate::config::RackConfig;
use crate::context::Context;
use crate::coordinator::{
    wait_closed, ConsumerRequest, Coordinator, DropRequest, Inbound, RackStats,
};
use crate::errors::RackError;
use crate::follower::FollowerStream;

/// The broker port programmed against by transports such as the HTTP layer.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Submit a message for routing.
    ///
    /// Suspends while the delivery queue is full. Having no consumer is not
    /// an error.
    async fn deliver(&self, ctx: &Context, message: Arc<Message>) -> Result<(), RackError>;

    /// Wait for the next message addressed to `address`.
    async fn take(&self, ctx: &Context, address: Address) -> Result<Arc<Message>, RackError>;

    /// Observe a copy of every message routed from now on.
    fn tail(&self, buffer: usize) -> FollowerStream;

    /// Stop the broker. Idempotent.
    fn close(&self) -> Result<(), RackError>;

    /// Whether [`Mailbox::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Sending halves shared by every clone of a [`Rack`].
#[derive(Debug)]
struct Shared {
    id: Uuid,
    deliveries: mpsc::Sender<Arc<Message>>,
    new_consumers: mpsc::Sender<ConsumerRequest>,
    drop_consumers: mpsc::UnboundedSender<DropRequest>,
    new_followers: mpsc::UnboundedSender<mpsc::Sender<Arc<Message>>>,
    stats_requests: mpsc::Sender<oneshot::Sender<RackStats>>,
    closed: watch::Sender<bool>,
    /// Serializes the open → closed transition.
    close_lock: Mutex<()>,
    next_consumer: AtomicU64,
}

/// In-process mailbox broker.
///
/// Cloning is cheap and every clone talks to the same coordinating task.
/// The task stops when [`Rack::close`] is called or the last clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct Rack {
    shared: Arc<Shared>,
}

impl Rack {
    /// Start a rack with default settings.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RackConfig::default())
    }

    /// Start a rack with explicit settings.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn with_config(config: RackConfig) -> Self {
        let config = config.normalized();
        let id = Uuid::new_v4();

        let (deliveries, deliveries_rx) = mpsc::channel(config.delivery_capacity);
        let (new_consumers, new_consumers_rx) = mpsc::channel(config.registration_capacity);
        let (drop_consumers, drop_consumers_rx) = mpsc::unbounded_channel();
        let (new_followers, new_followers_rx) = mpsc::unbounded_channel();
        let (stats_requests, stats_requests_rx) = mpsc::channel(config.registration_capacity);
        let (closed, closed_rx) = watch::channel(false);

        let coordinator = Coordinator::new(
            Inbound {
                deliveries: deliveries_rx,
                new_consumers: new_consumers_rx,
                drop_consumers: drop_consumers_rx,
                new_followers: new_followers_rx,
                stats_requests: stats_requests_rx,
                closed: closed_rx,
            },
            &config,
        );
        tokio::spawn(
            coordinator
                .run()
                .instrument(info_span!("rack", rack_id = %id)),
        );

        info!(
            rack_id = %id,
            delivery_capacity = config.delivery_capacity,
            cache_capacity = config.cache_capacity,
            retention_secs = config.retention.as_secs(),
            "Rack started"
        );

        Self {
            shared: Arc::new(Shared {
                id,
                deliveries,
                new_consumers,
                drop_consumers,
                new_followers,
                stats_requests,
                closed,
                close_lock: Mutex::new(()),
                next_consumer: AtomicU64::new(0),
            }),
        }
    }

    /// Identifier used in this rack's log spans.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Submit a message for routing.
    ///
    /// Returns once the delivery queue has accepted the message. Followers
    /// get a copy; the longest-waiting consumer of `message.to` gets the
    /// message itself, and without one it is cached for the retention
    /// period.
    ///
    /// # Errors
    ///
    /// The context's error if it ends first, [`RackError::Closed`] if the
    /// rack is or becomes closed.
    pub async fn deliver(
        &self,
        ctx: &Context,
        message: impl Into<Arc<Message>>,
    ) -> Result<(), RackError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if self.is_closed() {
            return Err(RackError::Closed);
        }

        let message = message.into();
        let mut closed = self.shared.closed.subscribe();
        tokio::select! {
            biased;
            err = ctx.done() => Err(err.into()),
            () = wait_closed(&mut closed) => Err(RackError::Closed),
            sent = self.shared.deliveries.send(message) => sent.map_err(|_| RackError::Closed),
        }
    }

    /// Wait for the next message addressed to `address`.
    ///
    /// A message already cached for `address` is returned at once. Dropping
    /// the returned future withdraws the registration.
    ///
    /// # Errors
    ///
    /// The context's error if it ends first, [`RackError::Closed`] if the
    /// rack is or becomes closed.
    pub async fn take(&self, ctx: &Context, address: Address) -> Result<Arc<Message>, RackError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if self.is_closed() {
            return Err(RackError::Closed);
        }

        let id = self.shared.next_consumer.fetch_add(1, Ordering::Relaxed);
        let (output, receiver) = oneshot::channel();
        let request = ConsumerRequest {
            id,
            address,
            output,
        };

        tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            sent = self.shared.new_consumers.send(request) => {
                if sent.is_err() {
                    return Err(RackError::Closed);
                }
            }
        }

        let mut registration = Registration {
            id,
            address,
            drops: &self.shared.drop_consumers,
            armed: true,
        };

        // A message that was already handed over wins over a context that
        // ended at the same time; the rack no longer holds it.
        let result = tokio::select! {
            biased;
            received = receiver => received.map_err(|_| RackError::Closed),
            err = ctx.done() => Err(err.into()),
        };
        if result.is_ok() {
            registration.disarm();
        }
        result
    }

    /// Register a follower that receives a copy of every message routed
    /// after this call returns, buffered up to `buffer` messages.
    ///
    /// Never suspends. A follower that falls behind silently misses
    /// messages. The stream ends when the rack closes; against a closed rack
    /// it has already ended.
    #[must_use]
    pub fn tail(&self, buffer: usize) -> FollowerStream {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        if !self.is_closed() {
            // On failure the sender is dropped with the error and the stream
            // ends, which is what a closed rack promises.
            let _ = self.shared.new_followers.send(sender);
        }
        FollowerStream::new(receiver)
    }

    /// Stop the rack.
    ///
    /// Pending `take` calls fail with [`RackError::Closed`], follower streams
    /// end and cached messages are discarded. Calling it again has no
    /// further effect.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the signature uniform with the other
    /// operations.
    pub fn close(&self) -> Result<(), RackError> {
        let _guard = self.shared.close_lock.lock();
        if !*self.shared.closed.borrow() {
            self.shared.closed.send_replace(true);
            info!(rack_id = %self.shared.id, "Rack closed");
        }
        Ok(())
    }

    /// Whether [`Rack::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Counts of followers, waiting consumers and cached messages.
    ///
    /// Registrations and deliveries accepted before this call are reflected
    /// in the answer.
    ///
    /// # Errors
    ///
    /// [`RackError::Closed`] once the rack is closed.
    pub async fn stats(&self) -> Result<RackStats, RackError> {
        if self.is_closed() {
            return Err(RackError::Closed);
        }
        let (reply, response) = oneshot::channel();
        self.shared
            .stats_requests
            .send(reply)
            .await
            .map_err(|_| RackError::Closed)?;
        response.await.map_err(|_| RackError::Closed)
    }
}

impl Default for Rack {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailbox for Rack {
    async fn deliver(&self, ctx: &Context, message: Arc<Message>) -> Result<(), RackError> {
        Rack::deliver(self, ctx, message).await
    }

    async fn take(&self, ctx: &Context, address: Address) -> Result<Arc<Message>, RackError> {
        Rack::take(self, ctx, address).await
    }

    fn tail(&self, buffer: usize) -> FollowerStream {
        Rack::tail(self, buffer)
    }

    fn close(&self) -> Result<(), RackError> {
        Rack::close(self)
    }

    fn is_closed(&self) -> bool {
        Rack::is_closed(self)
    }
}

/// Withdraws a consumer registration when a `take` ends without a message,
/// including when its future is dropped mid-wait.
struct Registration<'a> {
    id: u64,
    address: Address,
    drops: &'a mpsc::UnboundedSender<DropRequest>,
    armed: bool,
}

impl Registration<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Fails only once the loop is gone, and then there is nothing
            // left to withdraw from.
            let _ = self.drops.send(DropRequest {
                id: self.id,
                address: self.address,
            });
        }
    }
}
