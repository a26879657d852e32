//! HTTP front error types and their status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mailbox_rack::RackError;
use mailbox_types::{Address, CodecError};

/// Per-request failure, rendered as a plain-text response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Path does not name an inbox
    #[error("invalid inbox address: {0}")]
    BadAddress(String),

    /// Body is not an encoded message
    #[error("invalid message body: {0}")]
    BadMessage(#[source] CodecError),

    /// Body addresses a different inbox than the path
    #[error("message for {message} posted to inbox {path}")]
    AddressMismatch { path: Address, message: Address },

    /// Admission control refused another collect on this inbox
    #[error("too many listeners for inbox {0}")]
    TooManyListeners(Address),

    /// The rack has been closed
    #[error("mailbox is closed")]
    Closed,

    /// The rack did not accept or hand over a message in time
    #[error("mailbox error: {0}")]
    Mailbox(#[source] RackError),

    /// A collected message could not be encoded
    #[error("failed to encode message: {0}")]
    Encode(#[source] CodecError),
}

impl ApiError {
    /// HTTP status reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadAddress(_) | Self::BadMessage(_) | Self::AddressMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::TooManyListeners(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
            Self::Mailbox(_) | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RackError> for ApiError {
    fn from(err: RackError) -> Self {
        match err {
            RackError::Closed => Self::Closed,
            other => Self::Mailbox(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let body = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

/// Server lifecycle errors
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server bind error
    #[error("server bind error: {0}")]
    Bind(#[source] std::io::Error),

    /// The server stopped with an I/O error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
