use chatrelay::app::build_router;
use chatrelay::auth::{Claims, TokenVerifier};
use chatrelay::config::Heartbeat;
use chatrelay::hub::spawn_hub;
use chatrelay::origin::AllowedOrigins;
use chatrelay::protocol::ServerEvent;
use chatrelay::state::AppState;
use chatrelay::store::{InMemoryMessageStore, MessageStore};
use chatrelay::types::ChatMessage;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SECRET: &str = "socket-secret";
const ALLOWED_ORIGIN: &str = "http://localhost:5001";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn token_for(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        id: user_id.to_string(),
        iat: Some(now),
        exp: now + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_server() -> SocketAddr {
    start_server_with(Heartbeat::default()).await
}

async fn start_server_with(heartbeat: Heartbeat) -> SocketAddr {
    let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
    let state = AppState::new(TokenVerifier::new(SECRET.as_bytes()), store, spawn_hub())
        .with_heartbeat(heartbeat);
    let state = Arc::new(state);
    let app = build_router(state, AllowedOrigins::new(vec![ALLOWED_ORIGIN.to_string()]));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect_with_query(addr: SocketAddr, user_id: &str) -> Client {
    let url = format!("ws://{}/ws?token={}", addr, token_for(user_id));
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn connect_with_header(addr: SocketAddr, user_id: &str) -> Client {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    let bearer = format!("Bearer {}", token_for(user_id));
    request
        .headers_mut()
        .insert("Authorization", HeaderValue::from_str(&bearer).unwrap());
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static(ALLOWED_ORIGIN));
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

/// Next server event, skipping control frames
async fn next_event(ws: &mut Client) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for a server event")
            .expect("Socket closed early")
            .expect("Socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("Unexpected close: {:?}", frame),
            _ => continue,
        }
    }
}

/// Close code of the frame the server tears the connection down with
async fn close_code(ws: &mut Client) -> u16 {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Socket closed without a close frame")
            .expect("Socket error");
        if let Message::Close(Some(frame)) = frame {
            return frame.code.into();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws_send_raw(ws, &value.to_string()).await;
}

async fn ws_send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_missing_token_closes_with_4001() {
    let addr = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4001);
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let addr = start_server().await;
    let url = format!("ws://{}/ws?token=not-a-jwt", addr);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4002);
}

#[tokio::test]
async fn test_repeated_token_param_still_upgrades() {
    let addr = start_server().await;
    let token = token_for("alice");
    let url = format!("ws://{}/ws?token={}&token={}", addr, token, token);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(next_event(&mut ws).await, ServerEvent::ClientsTotal(1));

    let url = format!("ws://{}/ws?token=not-a-jwt&token=not-a-jwt", addr);
    let (mut rejected, _) = connect_async(url).await.unwrap();
    assert_eq!(close_code(&mut rejected).await, 4002);
}

#[tokio::test]
async fn test_silent_peer_is_dropped() {
    let addr = start_server_with(Heartbeat {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(300),
    })
    .await;

    // Alice stops reading after admission, so she never answers a ping
    let mut alice = connect_with_query(addr, "alice").await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::ClientsTotal(1));

    // Bob keeps reading, which answers every ping
    let mut bob = connect_with_query(addr, "bob").await;
    assert_eq!(next_event(&mut bob).await, ServerEvent::ClientsTotal(2));
    assert_eq!(next_event(&mut bob).await, ServerEvent::ClientsTotal(1));

    let health: Value = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["clientsTotal"], 1);
    drop(alice);
}

#[tokio::test]
async fn test_disallowed_origin_rejected_before_upgrade() {
    let addr = start_server().await;
    let mut request = format!("ws://{}/ws?token={}", addr, token_for("alice"))
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://evil.example"));

    match connect_async(request).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("Expected HTTP 403, got {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn test_chat_over_real_sockets() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let mut alice = connect_with_query(addr, "alice").await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::ClientsTotal(1));

    let mut bob = connect_with_header(addr, "bob").await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::ClientsTotal(2));
    assert_eq!(next_event(&mut bob).await, ServerEvent::ClientsTotal(2));

    send(
        &mut alice,
        json!({
            "event": "message",
            "data": {
                "userId": "someone-else",
                "name": "Alice",
                "message": "hello bob",
                "dateTime": "2024-01-01T00:00:00Z"
            }
        }),
    )
    .await;
    let typing = json!({ "feedback": "" });
    send(&mut alice, json!({ "event": "feedback", "data": typing })).await;

    let expected = ChatMessage {
        user_id: "alice".to_string(),
        name: "Alice".to_string(),
        message: "hello bob".to_string(),
        date_time: "2024-01-01T00:00:00Z".parse().unwrap(),
    };
    assert_eq!(next_event(&mut bob).await, ServerEvent::ChatMessage(expected.clone()));
    assert_eq!(next_event(&mut bob).await, ServerEvent::Feedback(typing.clone()));
    // Alice never hears her own message, only the feedback echo
    assert_eq!(next_event(&mut alice).await, ServerEvent::Feedback(typing));

    // Malformed frames are answered to the sender only
    ws_send_raw(&mut bob, "{not json").await;
    match next_event(&mut bob).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "PARSE_ERROR"),
        other => panic!("Expected parse error, got {:?}", other),
    }

    let history: Vec<ChatMessage> = http
        .get(format!("http://{}/messages?limit=10", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, vec![expected.clone()]);

    let health: Value = http
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "ok", "clientsTotal": 2 }));

    alice.close(None).await.unwrap();
    assert_eq!(next_event(&mut bob).await, ServerEvent::ClientsTotal(1));

    let history: Vec<ChatMessage> = http
        .get(format!("http://{}/messages", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, vec![expected]);
}
