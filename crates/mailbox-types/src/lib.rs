//! # Mailbox Types Crate
//!
//! The message model exchanged through a rack.
//!
//! ## Design Principles
//!
//! - **Leaf crate**: no runtime, no I/O; only shape, identity and encoding.
//! - **Flat addressing**: an [`Address`] is a `(node, process)` pair and two
//!   addresses match only when both fields are equal.
//! - **Lossless wire form**: [`codec::encode`] and [`codec::decode`] preserve
//!   every field of a [`Message`].

pub mod codec;
pub mod message;

pub use codec::{decode, encode, CodecError, MEDIA_TYPE};
pub use message::{Address, Headers, Message};
