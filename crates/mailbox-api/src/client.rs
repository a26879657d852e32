//! HTTP client for the submit and collect routes.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;

use mailbox_types::{decode, encode, Address, CodecError, Message, MEDIA_TYPE};

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message could not be encoded or the response not decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server answered with a status the call does not expect
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(StatusCode),
}

/// Talks to a mailbox HTTP front.
#[derive(Debug, Clone)]
pub struct MailboxClient {
    http: reqwest::Client,
    base_url: String,
}

impl MailboxClient {
    /// Client for the server at `base_url`, e.g. `http://127.0.0.1:7380`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Client reusing an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn inbox_url(&self, address: &Address) -> String {
        format!("{}/inbox/{}/{}", self.base_url, address.node, address.process)
    }

    /// Submit `message` to the inbox of `message.to`.
    pub async fn post(&self, message: &Message) -> Result<(), ClientError> {
        let body = encode(message)?;
        let response = self
            .http
            .post(self.inbox_url(&message.to))
            .header(CONTENT_TYPE, MEDIA_TYPE)
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Collect the next message of `address`, or `None` if the server's
    /// collect timeout elapsed first.
    pub async fn get(&self, address: &Address) -> Result<Option<Message>, ClientError> {
        let response = self.http.get(self.inbox_url(address)).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                Ok(Some(decode(&body)?))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }
}
