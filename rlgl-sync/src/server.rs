//! HTTP server composing the hub and the read-side routes.
//!
//! Architecture:
//! ```text
//! Client A ──┐  /ws (push, ping)
//!            ├──────────────► Hub ── Session ──► ConfigStore ──► PresenceSync
//! Client B ──┘                                     │
//!                                                  │ get_all / first
//! Browser ───── /status /config /events ◄──────────┘
//! ```
//!
//! The store lives for the lifetime of the server and is never persisted.
//!
//! [`serve_local`] is the standalone variant: no hub, no store, `/config`
//! and `/events` read straight from a YAML file.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthGate;
use crate::hub::{Hub, HubStatsSnapshot};
use crate::presence::{PresenceSync, DEFAULT_API_URL};
use crate::readers::{self, DEFAULT_EVENT_INTERVAL};
use crate::store::ConfigStore;

/// Default idle read timeout for push sessions.
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Credential every push connection must present
    pub auth_token: String,
    /// Presence API endpoint
    pub presence_api_url: String,
    /// Period between event-stream snapshots
    pub event_interval: Duration,
    /// Close push sessions silent for this long (None = never)
    pub session_idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            auth_token: String::new(),
            presence_api_url: DEFAULT_API_URL.to_string(),
            event_interval: DEFAULT_EVENT_INTERVAL,
            session_idle_timeout: Some(DEFAULT_SESSION_IDLE_TIMEOUT),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("auth_token", &"<redacted>")
            .field("presence_api_url", &self.presence_api_url)
            .field("event_interval", &self.event_interval)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .finish()
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("an auth token is required to run the server")]
    MissingToken,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// The status server.
#[derive(Debug)]
pub struct StatusServer {
    config: ServerConfig,
    store: Arc<ConfigStore>,
    hub: Hub,
    shutdown: CancellationToken,
}

impl StatusServer {
    /// Create a server with an empty store.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        if config.auth_token.is_empty() {
            return Err(ServerError::MissingToken);
        }

        let store = Arc::new(ConfigStore::with_presence(PresenceSync::new(
            config.presence_api_url.clone(),
        )));
        let shutdown = CancellationToken::new();
        let hub = Hub::new(Arc::clone(&store), AuthGate::new(config.auth_token.clone()))
            .with_idle_timeout(config.session_idle_timeout)
            .with_shutdown(shutdown.clone());

        Ok(Self {
            config,
            store,
            hub,
            shutdown,
        })
    }

    /// All routes: the hub plus the read-side surface.
    pub fn router(&self) -> Router {
        self.hub.router().merge(readers::router(
            Arc::clone(&self.store),
            self.config.event_interval,
            self.shutdown.clone(),
        ))
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Once it resolves, event streams end and push sessions are closed so
    /// the server can drain. The server cannot be served again afterwards.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        serve_router(listener, self.router(), self.shutdown.clone(), shutdown).await
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn hub_stats(&self) -> HubStatsSnapshot {
        self.hub.stats()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// Serve `/config`, `/events` and `/healthz` from the YAML file at
/// `config_path` until `shutdown` resolves.
pub async fn serve_local(
    listener: TcpListener,
    config_path: PathBuf,
    event_interval: Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    log::info!("Serving {} without a hub", config_path.display());
    let cancel = CancellationToken::new();
    let router = readers::local_router(config_path, event_interval, cancel.clone());
    serve_router(listener, router, cancel, shutdown).await
}

async fn serve_router(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    match listener.local_addr() {
        Ok(addr) => log::info!("Status server listening on {addr}"),
        Err(_) => log::info!("Status server listening"),
    }

    let signal = async move {
        shutdown.await;
        log::info!("Status server shutting down");
        cancel.cancel();
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .map_err(ServerError::Serve)?;

    log::info!("Status server stopped");
    Ok(())
}
