//! WebSocket client that pushes a status document to the server.
//!
//! Provides:
//! - Connection with bearer auth on the handshake (`ws://` or `wss://`),
//!   bounded by a handshake timeout
//! - Request/response `push` and `ping`
//! - Periodic push loop with a document loader
//! - HTTP fetch of the server's `/status` snapshot

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::document::{DocumentError, StatusDocument};
use crate::protocol::{Frame, MessageType, ProtocolError};

/// Timeout for the `/status` HTTP request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default limit for the TCP, TLS and WebSocket handshake together.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected message type: {0}")]
    UnexpectedType(String),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A pushing client bound to one client id.
pub struct StatusClient {
    server_url: String,
    client_id: String,
    token: String,
    handshake_timeout: Duration,
    conn: Option<WsStream>,
}

impl StatusClient {
    pub fn new(
        server_url: impl Into<String>,
        client_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            client_id: client_id.into(),
            token: token.into(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            conn: None,
        }
    }

    /// Give up on a connection attempt after `timeout`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the WebSocket connection.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        log::info!("Connecting to {}", self.server_url);

        let mut request = self
            .server_url
            .as_str()
            .into_client_request()
            .map_err(ClientError::Connect)?;
        if !self.token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|e| ClientError::Connect(e.into()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let handshake = tokio_tungstenite::connect_async(request);
        let (stream, _) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| ClientError::HandshakeTimeout(self.handshake_timeout))?
            .map_err(ClientError::Connect)?;
        self.conn = Some(stream);

        log::info!("Connected to {}", self.server_url);
        Ok(())
    }

    /// Close the connection, if open.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(mut conn) = self.conn.take() {
            conn.close(None).await?;
        }
        Ok(())
    }

    /// Push `document` and wait for the server's ack.
    pub async fn push(&mut self, document: &StatusDocument) -> Result<(), ClientError> {
        let response = self
            .request(&Frame::push(self.client_id.clone(), document.clone()))
            .await?;
        match response.message_type() {
            Some(MessageType::Ack) => {
                log::info!("Server acknowledged push for client {}", self.client_id);
                Ok(())
            }
            Some(MessageType::Error) => Err(ClientError::Server(response.error.unwrap_or_default())),
            _ => Err(ClientError::UnexpectedType(response.kind)),
        }
    }

    /// Ping the server and wait for its pong.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let response = self.request(&Frame::ping(self.client_id.clone())).await?;
        match response.message_type() {
            Some(MessageType::Pong) => Ok(()),
            Some(MessageType::Error) => Err(ClientError::Server(response.error.unwrap_or_default())),
            _ => Err(ClientError::UnexpectedType(response.kind)),
        }
    }

    /// Send one frame and read the response frame.
    pub async fn request(&mut self, frame: &Frame) -> Result<Frame, ClientError> {
        let text = frame.encode()?;
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = conn.send(Message::Text(text.into())).await {
            self.conn = None;
            return Err(e.into());
        }

        loop {
            let next = conn.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(Frame::decode(text.as_str())?),
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data);
                    return Ok(Frame::decode(&text)?);
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.conn = None;
                    return Err(ProtocolError::ConnectionClosed.into());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.conn = None;
                    return Err(e.into());
                }
            }
        }
    }

    /// Connect, push once, close.
    pub async fn run_once<F>(&mut self, load: F) -> Result<(), ClientError>
    where
        F: Fn() -> Result<StatusDocument, DocumentError>,
    {
        self.connect().await?;
        let result = match load() {
            Ok(document) => self.push(&document).await,
            Err(e) => Err(e.into()),
        };
        let _ = self.close().await;
        result?;
        log::info!("Document pushed for client {}", self.client_id);
        Ok(())
    }

    /// Connect and push every `interval`.
    ///
    /// The first push must succeed; later failures are logged and the loop
    /// keeps going, reconnecting when the connection was lost.
    pub async fn run<F>(&mut self, interval: Duration, load: F) -> Result<(), ClientError>
    where
        F: Fn() -> Result<StatusDocument, DocumentError>,
    {
        self.connect().await?;
        self.push(&load()?).await?;
        log::info!("Client {} started, pushing every {interval:?}", self.client_id);

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.push_tick(&load).await {
                log::error!("Failed to push document for client {}: {e}", self.client_id);
            }
        }
    }

    async fn push_tick<F>(&mut self, load: &F) -> Result<(), ClientError>
    where
        F: Fn() -> Result<StatusDocument, DocumentError>,
    {
        let document = load()?;
        if !self.is_connected() {
            self.connect().await?;
        }
        self.push(&document).await
    }
}

/// Fetch every stored document from the server's `/status` endpoint.
///
/// `base_url` is the server's HTTP root, e.g. `http://localhost:8080`.
pub async fn fetch_status(base_url: &str) -> Result<HashMap<String, StatusDocument>, ClientError> {
    let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let url = format!("{}/status", base_url.trim_end_matches('/'));

    let response = http.get(url).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(ClientError::UnexpectedStatus(response.status().as_u16()));
    }
    Ok(response.json().await?)
}
