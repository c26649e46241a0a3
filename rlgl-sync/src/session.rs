//! Per-connection protocol state machine.
//!
//! ```text
//! Established ──first frame──► Serving ──close / error / bad frame──► Closed
//!                                 │  ▲
//!                                 └──┘ receive → dispatch → respond
//! ```
//!
//! One inbound frame produces exactly one outbound frame, written before
//! the next inbound frame is read. The client id is taken from each frame;
//! the connection itself carries no identity.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::hub::HubStats;
use crate::protocol::{Frame, Inbound, ProtocolError, UNKNOWN_TYPE_ERROR};
use crate::store::ConfigStore;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Authenticated, no frame received yet
    Established,
    /// Handling frames
    Serving,
    /// Terminal
    Closed,
}

/// Apply one inbound frame to the store and build its response.
pub fn dispatch(store: &ConfigStore, inbound: Inbound) -> Frame {
    match inbound {
        Inbound::Push {
            client_id,
            document,
        } => {
            store.set(client_id.clone(), document);
            Frame::ack(client_id)
        }
        Inbound::Ping { client_id } => Frame::pong(client_id),
        Inbound::Unknown { client_id, .. } => Frame::error(client_id, UNKNOWN_TYPE_ERROR),
        Inbound::Invalid { client_id, reason } => Frame::error(client_id, reason),
    }
}

/// One connection's run of the push/ping protocol.
pub struct Session {
    id: Uuid,
    store: Arc<ConfigStore>,
    stats: Arc<HubStats>,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
    state: SessionState,
}

/// Outcome of waiting for the next transport message.
enum Inbox {
    Received(Option<Result<Message, axum::Error>>),
    Idle(Duration),
    Shutdown,
}

impl Session {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            stats: Arc::new(HubStats::default()),
            idle_timeout: None,
            shutdown: CancellationToken::new(),
            state: SessionState::Established,
        }
    }

    /// Share connection counters with the hub.
    pub fn with_stats(mut self, stats: Arc<HubStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Close the session when no frame arrives for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Close the session with "going away" once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Decode and dispatch one data frame.
    ///
    /// A decode failure closes the session.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Result<Frame, ProtocolError> {
        if self.state == SessionState::Closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.state = SessionState::Serving;

        let inbound = match Inbound::decode(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        self.stats.record_message();
        log::debug!(
            "Session {} received {} from client {}",
            self.id,
            inbound.kind(),
            inbound.client_id()
        );
        if let Inbound::Unknown { kind, client_id } = &inbound {
            log::warn!("Session {}: unknown message type {kind:?} from client {client_id}", self.id);
        }

        Ok(dispatch(&self.store, inbound))
    }

    /// Serve the connection until it closes.
    pub async fn run(mut self, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();
        log::info!("Session {} established", self.id);

        loop {
            let next = match self.next_message(&mut receiver).await {
                Inbox::Received(next) => next,
                Inbox::Idle(limit) => {
                    log::info!("Session {} idle for {limit:?}, closing", self.id);
                    let _ = sender
                        .send(close_message(close_code::AWAY, "idle timeout"))
                        .await;
                    break;
                }
                Inbox::Shutdown => {
                    log::info!("Session {} closing for server shutdown", self.id);
                    let _ = sender
                        .send(close_message(close_code::AWAY, "server shutting down"))
                        .await;
                    break;
                }
            };

            let result = match next {
                Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str().as_bytes()),
                Some(Ok(Message::Binary(data))) => self.handle_frame(&data),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(CloseFrame { code, reason })
                            if code != close_code::NORMAL && code != close_code::AWAY =>
                        {
                            log::warn!(
                                "Session {} closed abnormally ({code}): {}",
                                self.id,
                                reason.as_str()
                            );
                        }
                        _ => log::info!("Session {} closed by client", self.id),
                    }
                    break;
                }
                Some(Err(e)) => {
                    log::error!("Session {} read error: {e}", self.id);
                    break;
                }
                None => {
                    log::info!("Session {} connection ended", self.id);
                    break;
                }
            };

            let response = match result.and_then(|frame| frame.encode()) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Session {} protocol error: {e}", self.id);
                    let _ = sender
                        .send(close_message(close_code::PROTOCOL, "malformed frame"))
                        .await;
                    break;
                }
            };

            if let Err(e) = sender.send(Message::Text(response.into())).await {
                log::error!("Session {} failed to send response: {e}", self.id);
                break;
            }
        }

        self.state = SessionState::Closed;
        self.stats.record_disconnect();
        log::info!("Session {} closed", self.id);
    }

    async fn next_message(&self, receiver: &mut SplitStream<WebSocket>) -> Inbox {
        let read = async {
            match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, receiver.next()).await {
                    Ok(next) => Inbox::Received(next),
                    Err(_) => Inbox::Idle(limit),
                },
                None => Inbox::Received(receiver.next().await),
            }
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Inbox::Shutdown,
            inbox = read => inbox,
        }
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StatusDocument;
    use crate::protocol::MessageType;

    fn session() -> (Session, Arc<ConfigStore>) {
        let store = Arc::new(ConfigStore::new());
        (Session::new(Arc::clone(&store)), store)
    }

    fn push_json(client_id: &str, name: &str) -> String {
        let mut doc = StatusDocument {
            name: name.into(),
            ..StatusDocument::default()
        };
        doc.contributor.queue = vec!["t1".into(), "t2".into()];
        Frame::push(client_id, doc).encode().unwrap()
    }

    #[test]
    fn test_push_stores_and_acks() {
        let (mut s, store) = session();
        assert_eq!(s.state(), SessionState::Established);

        let reply = s.handle_frame(push_json("c1", "Site A").as_bytes()).unwrap();
        assert_eq!(reply, Frame::ack("c1"));
        assert_eq!(s.state(), SessionState::Serving);
        assert_eq!(store.get("c1").unwrap().name, "Site A");
    }

    #[test]
    fn test_ping_pongs_without_store_write() {
        let (mut s, store) = session();
        let reply = s.handle_frame(br#"{"type":"ping","client_id":"c1"}"#).unwrap();
        assert_eq!(reply, Frame::pong("c1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_type_keeps_session_usable() {
        let (mut s, _store) = session();
        let reply = s.handle_frame(br#"{"type":"bogus","client_id":"c1"}"#).unwrap();
        assert_eq!(reply.message_type(), Some(MessageType::Error));
        assert_eq!(reply.error.as_deref(), Some(UNKNOWN_TYPE_ERROR));
        assert_eq!(s.state(), SessionState::Serving);

        let reply = s.handle_frame(br#"{"type":"ping","client_id":"c1"}"#).unwrap();
        assert_eq!(reply, Frame::pong("c1"));
    }

    #[test]
    fn test_push_without_document_is_rejected() {
        let (mut s, store) = session();
        let reply = s.handle_frame(br#"{"type":"push","client_id":"c1"}"#).unwrap();
        assert_eq!(reply.message_type(), Some(MessageType::Error));
        assert_eq!(reply.client_id, "c1");
        assert!(store.get("c1").is_none());
        assert_eq!(s.state(), SessionState::Serving);
    }

    #[test]
    fn test_malformed_frame_closes_session() {
        let (mut s, _store) = session();
        assert!(matches!(
            s.handle_frame(b"{not json"),
            Err(ProtocolError::Decode(_))
        ));
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(
            s.handle_frame(br#"{"type":"ping","client_id":"c1"}"#),
            Err(ProtocolError::ConnectionClosed)
        );
    }

    #[test]
    fn test_one_connection_many_identities() {
        let (mut s, store) = session();
        s.handle_frame(push_json("c1", "one").as_bytes()).unwrap();
        s.handle_frame(push_json("c2", "two").as_bytes()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_messages_are_counted() {
        let stats = Arc::new(HubStats::default());
        let store = Arc::new(ConfigStore::new());
        let mut s = Session::new(store).with_stats(Arc::clone(&stats));
        s.handle_frame(br#"{"type":"ping","client_id":"c1"}"#).unwrap();
        s.handle_frame(br#"{"type":"other","client_id":"c1"}"#).unwrap();
        assert_eq!(stats.snapshot().total_messages, 2);
    }

    #[test]
    fn test_dispatch_table() {
        let store = ConfigStore::new();
        assert_eq!(
            dispatch(
                &store,
                Inbound::Invalid {
                    client_id: "c1".into(),
                    reason: "missing document".into()
                }
            ),
            Frame::error("c1", "missing document")
        );
        assert_eq!(
            dispatch(
                &store,
                Inbound::Unknown {
                    client_id: "c2".into(),
                    kind: "x".into()
                }
            ),
            Frame::error("c2", UNKNOWN_TYPE_ERROR)
        );
    }
}
