//! # Mailbox Node
//!
//! Hosts one rack behind the HTTP front.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (environment)
//! 2. Start the rack
//! 3. Bind and start the HTTP server
//! 4. Start the stats reporter
//!
//! ## Shutdown Sequence
//!
//! 1. Signal shutdown to the server and the reporter
//! 2. Close the rack, releasing every waiting collect
//! 3. Wait (bounded) for the server to drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mailbox_api::{ApiConfig, MailboxApiService, ServiceError};
use mailbox_rack::{Mailbox, Rack, RackConfig};

/// How long shutdown waits for the HTTP server to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// HTTP front configuration.
    pub api: ApiConfig,
    /// Rack sizing and retention.
    pub rack: RackConfig,
    /// Interval of the stats log line; `None` disables it.
    pub stats_interval: Option<Duration>,
}

impl NodeConfig {
    /// Load configuration from the environment.
    ///
    /// `MAILBOX_STATS_INTERVAL_SECS` sets the stats interval; 0 disables it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api = ApiConfig::from_env().map_err(|e| ConfigError::Api(e.to_string()))?;
        let stats_interval = match std::env::var("MAILBOX_STATS_INTERVAL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::StatsInterval(raw.clone()))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => Some(Duration::from_secs(30)),
        };

        Ok(Self {
            api,
            rack: RackConfig::from_env(),
            stats_interval,
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The HTTP front configuration is invalid.
    #[error("api configuration: {0}")]
    Api(String),
    /// The stats interval is not a number of seconds.
    #[error("MAILBOX_STATS_INTERVAL_SECS must be a number of seconds, got {0:?}")]
    StatsInterval(String),
}

/// The node runtime: one rack and its HTTP front.
pub struct NodeRuntime {
    config: NodeConfig,
    rack: Rack,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
    server: Mutex<Option<JoinHandle<Result<(), ServiceError>>>>,
}

impl NodeRuntime {
    /// Create a node runtime and start its rack.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: NodeConfig) -> Self {
        info!("Creating mailbox node runtime");

        let rack = Rack::with_config(config.rack.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            rack,
            shutdown_tx,
            shutdown_rx,
            server: Mutex::new(None),
        }
    }

    /// The rack served by this node.
    pub fn rack(&self) -> &Rack {
        &self.rack
    }

    /// Bind the HTTP front and start serving. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        info!("===========================================");
        info!("  Mailbox Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let mailbox: Arc<dyn Mailbox> = Arc::new(self.rack.clone());
        let service = MailboxApiService::new(self.config.api.clone(), mailbox)
            .context("Failed to create HTTP service")?;

        let bind_addr = self.config.api.bind_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        let local_addr = listener.local_addr()?;

        let shutdown = self.shutdown_signal();
        let handle = tokio::spawn(service.serve(listener, shutdown));
        *self.server.lock() = Some(handle);

        if let Some(interval) = self.config.stats_interval {
            self.start_stats_reporter(interval);
        }

        info!(rack_id = %self.rack.id(), addr = %local_addr, "Node started");
        Ok(local_addr)
    }

    /// Resolve once shutdown is signalled.
    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown_rx.clone();
        async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        }
    }

    fn start_stats_reporter(&self, interval: Duration) {
        let rack = self.rack.clone();
        let shutdown = self.shutdown_signal();

        tokio::spawn(async move {
            let report = async {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match rack.stats().await {
                        Ok(stats) => info!(
                            followers = stats.followers,
                            consumers = stats.consumers,
                            cached = stats.cached,
                            "Rack stats"
                        ),
                        Err(_) => break,
                    }
                }
            };
            tokio::select! {
                () = report => {}
                () = shutdown => {}
            }
        });
    }

    /// Shutdown the node gracefully.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        // Waiting collects must return before the server can drain.
        if let Err(e) = self.rack.close() {
            error!(error = %e, "Failed to close rack");
        }

        let handle = self.server.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed"),
                Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
                Err(_) => warn!("HTTP server did not stop in time"),
            }
        }

        info!("Shutdown complete");
    }
}
