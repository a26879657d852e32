//! # Message Model
//!
//! The addressed unit of payload that flows through a rack.
//!
//! ## Properties
//!
//! - **Immutability**: once handed to a rack a message is shared behind an
//!   `Arc` and never mutated again.
//! - **Caller-assigned identity**: `id` is expected to be globally unique; nothing
//!   in the rack checks it.
//! - **Opaque correlation**: `reply_to` links a reply to its request. The rack
//!   passes it through untouched, so an actor may see a reply for a request it
//!   never sent and must cope with that itself.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Free-form message headers: key to ordered values.
pub type Headers = HashMap<String, Vec<String>>;

/// A logical endpoint: a node and a process running inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// The node (actor host) identifier.
    pub node: Uuid,
    /// The process within the node.
    pub process: u64,
}

impl Address {
    /// Create an address.
    #[must_use]
    pub const fn new(node: Uuid, process: u64) -> Self {
        Self { node, process }
    }

    /// Create an address on a freshly generated node.
    #[must_use]
    pub fn random(process: u64) -> Self {
        Self::new(Uuid::new_v4(), process)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.process)
    }
}

/// An addressed, immutable message.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Caller-assigned identifier.
    pub id: Uuid,

    /// The sending endpoint.
    pub from: Address,

    /// The destination endpoint. Racks route on this field only.
    pub to: Address,

    /// Opaque payload; the encoding is up to the actors.
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,

    /// Identifier of the request this message answers, or nil.
    pub reply_to: Uuid,

    /// Optional headers. `None` and `Some(empty)` are distinct and both
    /// survive the wire codec.
    pub headers: Option<Headers>,
}

impl Message {
    /// Create a message with a fresh v4 id and no correlation.
    #[must_use]
    pub fn new(from: Address, to: Address, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            payload: payload.into(),
            reply_to: Uuid::nil(),
            headers: None,
        }
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Mark this message as answering `request_id`.
    #[must_use]
    pub fn reply_to(mut self, request_id: Uuid) -> Self {
        self.reply_to = request_id;
        self
    }

    /// Append a header value, creating the header map on first use.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Build the reply to this message: addressed back to the sender,
    /// correlated through `reply_to`.
    #[must_use]
    pub fn reply(&self, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(self.to, self.from, payload).reply_to(self.id)
    }

    /// Whether this message answers some earlier request.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        !self.reply_to.is_nil()
    }

    /// All values of a header, empty when absent.
    #[must_use]
    pub fn header(&self, key: &str) -> &[String] {
        self.headers
            .as_ref()
            .and_then(|h| h.get(key))
            .map_or(&[], Vec::as_slice)
    }
}
