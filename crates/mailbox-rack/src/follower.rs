//! # Follower Streams
//!
//! The tailing side of a rack: a follower receives a copy of every message
//! the rack routes, whatever its address.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::Stream;

use mailbox_types::Message;

/// Errors from follower operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FollowerError {
    /// The rack shut down and every buffered message has been read.
    #[error("Rack closed")]
    Closed,
}

/// Receive-only handle returned by [`Rack::tail`](crate::Rack::tail).
///
/// The rack never waits for a follower: when the buffer is full the copy
/// meant for this follower is dropped. The stream ends when the rack shuts
/// down.
#[derive(Debug)]
pub struct FollowerStream {
    receiver: mpsc::Receiver<Arc<Message>>,
}

impl FollowerStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Arc<Message>>) -> Self {
        Self { receiver }
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next message routed by the rack
    /// - `None` - The rack shut down
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }

    /// Try to receive the next message without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` - A message was buffered
    /// - `Ok(None)` - Nothing buffered yet
    /// - `Err(FollowerError::Closed)` - The rack shut down
    pub fn try_recv(&mut self) -> Result<Option<Arc<Message>>, FollowerError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FollowerError::Closed),
        }
    }

    /// Buffer size requested at registration.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.receiver.max_capacity()
    }
}

impl Stream for FollowerStream {
    type Item = Arc<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
