//! Read-side HTTP surface over the store.
//!
//! | Route      | Response                                             |
//! |------------|------------------------------------------------------|
//! | `/status`  | every stored document, keyed by client id (JSON)     |
//! | `/config`  | one stored document (JSON), 404 when empty           |
//! | `/events`  | SSE: one document per interval until disconnect      |
//! | `/healthz` | `ok`                                                 |
//!
//! Which document `/config` and `/events` pick when several clients have
//! pushed is unspecified. Every published document is redacted.
//!
//! [`local_router`] serves `/config` and `/events` from a YAML file instead
//! of the store, re-reading it on every request and tick.
//!
//! Event streams end when the client disconnects or the server's shutdown
//! token is cancelled.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::document::StatusDocument;
use crate::store::ConfigStore;

/// Default period between event-stream snapshots.
pub const DEFAULT_EVENT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct ReaderState {
    store: Arc<ConfigStore>,
    interval: Duration,
    shutdown: CancellationToken,
}

/// Router with the read-side routes.
pub fn router(store: Arc<ConfigStore>, interval: Duration, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/config", get(config))
        .route("/events", get(events))
        .route("/healthz", get(healthz))
        .with_state(ReaderState {
            store,
            interval,
            shutdown,
        })
}

/// Redacted copy of the whole store.
pub fn status_snapshot(store: &ConfigStore) -> HashMap<String, StatusDocument> {
    store
        .get_all()
        .into_iter()
        .map(|(id, doc)| (id, doc.redacted()))
        .collect()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<ReaderState>) -> Json<HashMap<String, StatusDocument>> {
    Json(status_snapshot(&state.store))
}

async fn config(State(state): State<ReaderState>) -> Response {
    match state.store.first() {
        Some((_, doc)) => no_store(doc),
        None => (StatusCode::NOT_FOUND, "no configs available").into_response(),
    }
}

async fn events(State(state): State<ReaderState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(snapshot_events(state.store, state.interval, state.shutdown))
        .keep_alive(KeepAlive::default())
}

fn no_store(doc: StatusDocument) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Json(doc.redacted())).into_response()
}

/// What one tick of an event stream does.
enum Tick {
    Emit(StatusDocument),
    Skip,
    End,
}

/// Stream one event per `period` carrying a store snapshot.
///
/// Ticks that find the store empty emit nothing. The stream ends when
/// `shutdown` is cancelled; dropping it drops its timer.
pub fn snapshot_events(
    store: Arc<ConfigStore>,
    period: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ticking_events(period, shutdown, move || match store.first() {
        Some((_, doc)) => Tick::Emit(doc),
        None => Tick::Skip,
    })
}

/// Stream one event per `period` carrying the document at `path`.
///
/// The file is re-read on every tick. A read or parse failure is logged and
/// ends the stream.
pub fn file_events(
    path: PathBuf,
    period: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ticking_events(period, shutdown, move || match StatusDocument::load(&path) {
        Ok(doc) => Tick::Emit(doc),
        Err(e) => {
            log::error!("Failed to load document for event stream: {e}");
            Tick::End
        }
    })
}

fn ticking_events<F>(
    period: Duration,
    shutdown: CancellationToken,
    next: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: FnMut() -> Tick,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    stream::unfold((ticker, shutdown, next), |(mut ticker, shutdown, mut next)| async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = ticker.tick() => {}
            }
            let doc = match next() {
                Tick::Emit(doc) => doc,
                Tick::Skip => continue,
                Tick::End => return None,
            };
            match serde_json::to_string(&doc.redacted()) {
                Ok(payload) => {
                    return Some((Ok(Event::default().data(payload)), (ticker, shutdown, next)))
                }
                Err(e) => log::error!("Failed to encode event payload: {e}"),
            }
        }
    })
}

#[derive(Clone)]
struct LocalState {
    path: Arc<PathBuf>,
    interval: Duration,
    shutdown: CancellationToken,
}

/// Router serving `/config`, `/events` and `/healthz` from the YAML file at
/// `path`, without a store or a hub.
pub fn local_router(path: PathBuf, interval: Duration, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/config", get(local_config))
        .route("/events", get(local_events))
        .route("/healthz", get(healthz))
        .with_state(LocalState {
            path: Arc::new(path),
            interval,
            shutdown,
        })
}

async fn local_config(State(state): State<LocalState>) -> Response {
    match StatusDocument::load(state.path.as_ref()) {
        Ok(doc) => no_store(doc),
        Err(e) => {
            log::error!("Failed to load document: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

async fn local_events(
    State(state): State<LocalState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let path = PathBuf::clone(&state.path);
    Sse::new(file_events(path, state.interval, state.shutdown)).keep_alive(KeepAlive::default())
}
