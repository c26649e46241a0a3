//! Integration tests for the push protocol over real WebSocket connections.
//!
//! These tests start a real server on a loopback port and connect real
//! clients, verifying authentication, the request/response protocol, and
//! the resulting store contents.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rlgl_sync::protocol::Frame;
use rlgl_sync::server::{ServerConfig, StatusServer};
use rlgl_sync::{StatusClient, StatusDocument};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const TOKEN: &str = "test-token-12345";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        auth_token: TOKEN.into(),
        presence_api_url: "http://127.0.0.1:1/api/users.profile.set".into(),
        ..ServerConfig::default()
    }
}

/// Start a server on a free port, return its address and handle.
async fn start_test_server(config: ServerConfig) -> (String, Arc<StatusServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Arc::new(StatusServer::new(config).unwrap());
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        serving
            .serve(listener, std::future::pending())
            .await
            .unwrap();
    });
    (addr, server)
}

async fn dial(url: &str, authorization: Option<&str>) -> Result<Ws, WsError> {
    let mut request = url.into_client_request().unwrap();
    if let Some(value) = authorization {
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(ws, _)| ws)
}

async fn connect(addr: &str) -> Ws {
    dial(&format!("ws://{addr}/ws"), Some(&format!("Bearer {TOKEN}")))
        .await
        .unwrap()
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("response within timeout")
            .expect("connection open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn assert_unauthorized(result: Result<Ws, WsError>) {
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        Err(other) => panic!("expected 401, got {other}"),
        Ok(_) => panic!("expected connection to be rejected"),
    }
}

fn site_a() -> Value {
    json!({
        "name": "Site A",
        "contributor": {"active": true, "focus": "writing", "queue": ["t1", "t2"]}
    })
}

#[tokio::test]
async fn test_push_scenario_ack_and_store() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "push", "client_id": "c1", "document": site_a()})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "ack", "client_id": "c1"}));

    let expected: StatusDocument = serde_json::from_value(site_a()).unwrap();
    let all = server.store().get_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all["c1"], expected);
    assert_eq!(all["c1"].contributor.queue, vec!["t1", "t2"]);
}

#[tokio::test]
async fn test_ping_pong() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "ping", "client_id": "c7"})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "pong", "client_id": "c7"}));
    assert!(server.store().is_empty());
}

#[tokio::test]
async fn test_unknown_type_then_connection_still_usable() {
    let (addr, _server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "subscribe", "client_id": "c1"})).await;
    assert_eq!(
        recv(&mut ws).await,
        json!({"type": "error", "client_id": "c1", "error": "unknown message type"})
    );

    send(&mut ws, json!({"type": "ping", "client_id": "c1"})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_push_without_document_gets_error() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "push", "client_id": "c1"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["client_id"], "c1");
    assert!(server.store().get("c1").is_none());

    send(&mut ws, json!({"type": "push", "client_id": "c1", "document": {"contributor": {"queue": 5}}})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");
    assert!(server.store().is_empty());
}

#[tokio::test]
async fn test_responses_follow_request_order() {
    let (addr, _server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"type": "push", "client_id": "c1", "document": site_a()})).await;
    send(&mut ws, json!({"type": "ping", "client_id": "c2"})).await;
    send(&mut ws, json!({"type": "nope", "client_id": "c3"})).await;
    send(&mut ws, json!({"type": "push", "client_id": "c4", "document": {}})).await;

    assert_eq!(recv(&mut ws).await, json!({"type": "ack", "client_id": "c1"}));
    assert_eq!(recv(&mut ws).await, json!({"type": "pong", "client_id": "c2"}));
    assert_eq!(recv(&mut ws).await["client_id"], "c3");
    assert_eq!(recv(&mut ws).await, json!({"type": "ack", "client_id": "c4"}));
}

#[tokio::test]
async fn test_binary_frames_are_accepted() {
    let (addr, _server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    let ping = Frame::ping("c1").encode().unwrap();
    ws.send(Message::Binary(ping.into_bytes().into())).await.unwrap();
    assert_eq!(recv(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (addr, _server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();

    let next = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    match next {
        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_connection_can_push_many_identities() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    for id in ["a", "b", "c"] {
        send(&mut ws, json!({"type": "push", "client_id": id, "document": {"name": id}})).await;
        assert_eq!(recv(&mut ws).await["type"], "ack");
    }
    assert_eq!(server.store().len(), 3);
}

#[tokio::test]
async fn test_two_clients_push_concurrently() {
    let (addr, server) = start_test_server(test_config()).await;

    let push = |client_id: &'static str, name: &'static str| {
        let addr = addr.clone();
        async move {
            let mut ws = connect(&addr).await;
            for round in 0..10 {
                let doc = json!({"name": format!("{name}-{round}")});
                send(&mut ws, json!({"type": "push", "client_id": client_id, "document": doc})).await;
                assert_eq!(recv(&mut ws).await["client_id"], client_id);
            }
        }
    };
    tokio::join!(push("c1", "one"), push("c2", "two"));

    let all = server.store().get_all();
    assert_eq!(all.len(), 2);
    assert_eq!(all["c1"].name, "one-9");
    assert_eq!(all["c2"].name, "two-9");
}

#[tokio::test]
async fn test_rejects_missing_credential() {
    let (addr, server) = start_test_server(test_config()).await;
    assert_unauthorized(dial(&format!("ws://{addr}/ws"), None).await);
    assert_eq!(server.hub_stats().rejected_connections, 1);
    assert_eq!(server.hub_stats().total_connections, 0);
}

#[tokio::test]
async fn test_rejects_wrong_header_credential() {
    let (addr, _server) = start_test_server(test_config()).await;
    assert_unauthorized(dial(&format!("ws://{addr}/ws"), Some("Bearer wrong-token")).await);
}

#[tokio::test]
async fn test_rejects_wrong_query_credential() {
    let (addr, _server) = start_test_server(test_config()).await;
    assert_unauthorized(dial(&format!("ws://{addr}/ws?token=wrong-token"), None).await);
}

#[tokio::test]
async fn test_rejects_malformed_header_even_with_valid_query() {
    let (addr, _server) = start_test_server(test_config()).await;
    let url = format!("ws://{addr}/ws?token={TOKEN}");
    assert_unauthorized(dial(&url, Some(&format!("Token {TOKEN}"))).await);
}

#[tokio::test]
async fn test_accepts_query_credential() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = dial(&format!("ws://{addr}/ws?token={TOKEN}"), None)
        .await
        .unwrap();

    send(&mut ws, json!({"type": "ping", "client_id": "q"})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");
    assert_eq!(server.hub_stats().total_connections, 1);
}

#[tokio::test]
async fn test_hubs_have_independent_credentials() {
    let (addr_a, _a) = start_test_server(ServerConfig {
        auth_token: "token-a".into(),
        ..test_config()
    })
    .await;
    let (addr_b, _b) = start_test_server(ServerConfig {
        auth_token: "token-b".into(),
        ..test_config()
    })
    .await;

    assert!(dial(&format!("ws://{addr_a}/ws"), Some("Bearer token-a")).await.is_ok());
    assert_unauthorized(dial(&format!("ws://{addr_a}/ws"), Some("Bearer token-b")).await);
    assert!(dial(&format!("ws://{addr_b}/ws"), Some("Bearer token-b")).await.is_ok());
}

#[tokio::test]
async fn test_presence_failure_still_acks() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut ws = connect(&addr).await;

    let doc = json!({
        "name": "Site A",
        "user": "ben",
        "contributor": {"active": true, "focus": "writing"},
        "presence": {"enabled": true, "credential": "xoxp-test"}
    });
    send(&mut ws, json!({"type": "push", "client_id": "c1", "document": doc})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "ack", "client_id": "c1"}));
    assert!(server.store().get("c1").unwrap().presence.enabled);
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let (addr, server) = start_test_server(ServerConfig {
        session_idle_timeout: Some(Duration::from_millis(200)),
        ..test_config()
    })
    .await;
    let mut ws = connect(&addr).await;

    let next = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.hub_stats().active_connections, 0);
}

#[tokio::test]
async fn test_status_client_push_and_ping() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut client = StatusClient::new(format!("ws://{addr}/ws"), "laptop", TOKEN);
    client.connect().await.unwrap();

    let doc: StatusDocument = serde_json::from_value(site_a()).unwrap();
    client.push(&doc).await.unwrap();
    client.ping().await.unwrap();
    client.close().await.unwrap();

    assert_eq!(server.store().get("laptop"), Some(doc));
}

#[tokio::test]
async fn test_status_client_rejected_with_wrong_token() {
    let (addr, _server) = start_test_server(test_config()).await;
    let mut client = StatusClient::new(format!("ws://{addr}/ws"), "laptop", "nope");
    assert!(matches!(
        client.connect().await,
        Err(rlgl_sync::ClientError::Connect(_))
    ));
}

#[tokio::test]
async fn test_status_client_run_once() {
    let (addr, server) = start_test_server(test_config()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rlgl.yaml");
    std::fs::write(&path, "name: From File\ncontributor:\n  queue: [x, y]\n").unwrap();

    let mut client = StatusClient::new(format!("ws://{addr}/ws"), "desk", TOKEN);
    client
        .run_once(|| StatusDocument::load(&path))
        .await
        .unwrap();
    assert!(!client.is_connected());

    let stored = server.store().get("desk").unwrap();
    assert_eq!(stored.name, "From File");
    assert_eq!(stored.contributor.queue, vec!["x", "y"]);
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = StatusServer::new(test_config()).unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = stopped.await;
            })
            .await
    });

    let mut ws = connect(&addr).await;
    send(&mut ws, json!({"type": "ping", "client_id": "c1"})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");

    stop.send(()).unwrap();
    let next = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));

    let result = timeout(Duration::from_secs(3), serving)
        .await
        .expect("serve returns after shutdown with an open session");
    assert!(result.unwrap().is_ok());
}
