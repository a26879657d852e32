//! # Error Types
//!
//! Errors surfaced by rack operations. Context errors are carried through
//! unchanged; the rack adds only [`RackError::Closed`].

use crate::context::ContextError;
use thiserror::Error;

/// Errors returned by [`Rack`](crate::Rack) operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RackError {
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The rack was closed before or while the operation ran.
    #[error("rack closed")]
    Closed,
}

impl RackError {
    /// Whether the error came from the caller's context rather than the rack.
    #[must_use]
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<ContextError> for RackError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
