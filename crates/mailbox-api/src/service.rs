//! HTTP front service - routes, handlers and server lifecycle.
//!
//! ```text
//! POST /inbox/:node/:process   encoded message → deliver   200 | 400 | 500 | 503
//! GET  /inbox/:node/:process   take → encoded message      200 | 204 | 400 | 429 | 503
//! GET  /health                                             200
//! GET  /metrics                Prometheus text             200 | 500
//! ```

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mailbox_rack::{Context, Mailbox, RackError};
use mailbox_telemetry::metrics::{encode_metrics, API_COLLECT_REJECTED, API_REQUESTS};
use mailbox_types::{decode, encode, Address, MEDIA_TYPE};

use crate::admission::ListenerRegistry;
use crate::config::ApiConfig;
use crate::error::{ApiError, ServiceError};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    mailbox: Arc<dyn Mailbox>,
    config: Arc<ApiConfig>,
    listeners: Arc<ListenerRegistry>,
}

/// HTTP front over any [`Mailbox`].
pub struct MailboxApiService {
    config: Arc<ApiConfig>,
    mailbox: Arc<dyn Mailbox>,
    listeners: Arc<ListenerRegistry>,
}

impl MailboxApiService {
    /// Create a new service
    pub fn new(config: ApiConfig, mailbox: Arc<dyn Mailbox>) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Config(e.to_string()))?;

        let listeners = Arc::new(ListenerRegistry::new(config.max_listeners_per_inbox));
        Ok(Self {
            config: Arc::new(config),
            mailbox,
            listeners,
        })
    }

    /// Get the configuration in use
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Get the listener registry (admission control state)
    pub fn listeners(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.listeners)
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let state = AppState {
            mailbox: Arc::clone(&self.mailbox),
            config: Arc::clone(&self.config),
            listeners: Arc::clone(&self.listeners),
        };

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(self.config.max_body_size));

        Router::new()
            .route("/inbox/:node/:process", get(collect).post(submit))
            .route("/health", get(health_check))
            .route("/metrics", get(metrics))
            .layer(middleware)
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn start<F>(self, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(ServiceError::Bind)?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr().map_err(ServiceError::Bind)?;
        info!(addr = %local_addr, "Starting HTTP server");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServiceError::Serve)?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Count the request under `route` and render it.
fn respond(route: &'static str, result: Result<Response, ApiError>) -> Response {
    let response = result.unwrap_or_else(IntoResponse::into_response);
    API_REQUESTS
        .with_label_values(&[route, response.status().as_str()])
        .inc();
    response
}

fn parse_address(node: &str, process: &str) -> Result<Address, ApiError> {
    let node = Uuid::parse_str(node).map_err(|e| ApiError::BadAddress(e.to_string()))?;
    let process = process
        .parse::<u64>()
        .map_err(|e| ApiError::BadAddress(format!("process: {e}")))?;
    Ok(Address::new(node, process))
}

/// Handle a submit: decode the body and deliver it.
async fn submit(
    State(state): State<AppState>,
    Path((node, process)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    respond("submit", submit_inner(&state, &node, &process, &body).await)
}

async fn submit_inner(
    state: &AppState,
    node: &str,
    process: &str,
    body: &[u8],
) -> Result<Response, ApiError> {
    let inbox = parse_address(node, process)?;
    let message = decode(body).map_err(ApiError::BadMessage)?;
    if message.to != inbox {
        return Err(ApiError::AddressMismatch {
            path: inbox,
            message: message.to,
        });
    }

    let (message_id, reply_to) = (message.id, message.reply_to);
    let ctx = Context::with_timeout(state.config.submit_timeout);
    state
        .mailbox
        .deliver(&ctx, Arc::new(message))
        .await
        .map_err(|err| {
            error!(%inbox, %message_id, %reply_to, error = %err, "Error delivering message for inbox");
            ApiError::from(err)
        })?;

    debug!(%inbox, %message_id, "Message submitted");
    Ok(StatusCode::OK.into_response())
}

/// Handle a collect: wait for the next message of the inbox.
async fn collect(
    State(state): State<AppState>,
    Path((node, process)): Path<(String, String)>,
) -> Response {
    respond("collect", collect_inner(&state, &node, &process).await)
}

async fn collect_inner(state: &AppState, node: &str, process: &str) -> Result<Response, ApiError> {
    let inbox = parse_address(node, process)?;

    let Some(_listener) = state.listeners.try_acquire(inbox) else {
        API_COLLECT_REJECTED.inc();
        warn!(%inbox, "Too many listeners for inbox");
        return Err(ApiError::TooManyListeners(inbox));
    };

    let ctx = Context::with_timeout(state.config.collect_timeout);
    let message = match state.mailbox.take(&ctx, inbox).await {
        Ok(message) => message,
        Err(RackError::DeadlineExceeded) => {
            debug!(%inbox, "Collect timed out");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Err(err) => {
            error!(%inbox, error = %err, "Error fetching message for inbox");
            return Err(err.into());
        }
    };

    let body = encode(&message).map_err(|err| {
        error!(%inbox, message_id = %message.id, error = %err, "Error encoding message for inbox");
        ApiError::Encode(err)
    })?;

    debug!(%inbox, message_id = %message.id, "Message collected");
    Ok(([(header::CONTENT_TYPE, MEDIA_TYPE)], body).into_response())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Prometheus text exposition
async fn metrics() -> Response {
    match encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
