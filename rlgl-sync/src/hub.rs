//! Connection entry point: authenticate, upgrade, start a session.
//!
//! ```text
//! GET /ws ──► AuthGate::authorize ──✗──► 401 Unauthorized (no upgrade)
//!                    │
//!                    ✓
//!                    ▼
//!             WebSocket upgrade ──► Session::run  (own task per connection)
//! ```
//!
//! Sessions share nothing but the [`ConfigStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthGate;
use crate::session::Session;
use crate::store::ConfigStore;

/// Path the hub is mounted at.
pub const WS_PATH: &str = "/ws";

/// Point-in-time view of [`HubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
}

/// Lock-free connection counters.
#[derive(Debug, Default)]
pub struct HubStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    total_messages: AtomicU64,
}

impl HubStats {
    pub(crate) fn record_connect(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn record_rejection(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
        }
    }
}

/// Accepts push connections for one store.
///
/// Each hub carries its own credential, so several independently configured
/// hubs can run in one process.
#[derive(Debug, Clone)]
pub struct Hub {
    store: Arc<ConfigStore>,
    gate: Arc<AuthGate>,
    stats: Arc<HubStats>,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(store: Arc<ConfigStore>, gate: AuthGate) -> Self {
        Self {
            store,
            gate: Arc::new(gate),
            stats: Arc::new(HubStats::default()),
            idle_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Close sessions that stay silent for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Close every session once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Router serving the hub at [`WS_PATH`].
    pub fn router(&self) -> Router {
        Router::new()
            .route(WS_PATH, get(upgrade))
            .with_state(self.clone())
    }

    /// Authenticate a connection attempt and, on success, upgrade it and
    /// spawn its session.
    pub fn accept(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> Response {
        if let Err(e) = self.gate.authorize(headers, uri.query()) {
            self.stats.record_rejection();
            log::warn!("Rejected connection: {e}");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }

        let ws = match ws {
            Ok(ws) => ws,
            Err(rejection) => return rejection.into_response(),
        };

        self.stats.record_connect();
        let session = Session::new(Arc::clone(&self.store))
            .with_stats(Arc::clone(&self.stats))
            .with_idle_timeout(self.idle_timeout)
            .with_shutdown(self.shutdown.child_token());
        log::info!("Accepted connection as session {}", session.id());

        ws.on_upgrade(move |socket| session.run(socket))
    }
}

async fn upgrade(
    State(hub): State<Hub>,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    hub.accept(&headers, &uri, ws)
}
