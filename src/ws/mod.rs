pub mod session;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::AppState;
use crate::types::ConnectionId;

use session::{Session, SessionError};

/// Close code for a failure on our side while admitting the connection
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// First non-blank `token` query parameter.
///
/// Parameters are read as raw pairs so a repeated `token` still reaches
/// verification instead of failing the handshake.
fn query_token(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .filter(|(key, _)| key == "token")
        .map(|(_, value)| value.as_str())
        .find(|value| !value.trim().is_empty())
}

/// Tracks when the peer was last heard from
#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Instant,
    timeout: Duration,
}

impl Liveness {
    fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// Any inbound frame, pongs included, counts as a sign of life
    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn is_expired(&self) -> bool {
        self.last_seen.elapsed() >= self.timeout
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let connection_id = ulid::Ulid::new().to_string();
    let credential = auth::credential_from_handshake(&headers, query_token(&params));

    tracing::info!(
        connection_id = %connection_id,
        has_credential = credential.is_some(),
        "WebSocket connection request"
    );

    ws.on_upgrade(move |socket| handle_socket(socket, connection_id, credential, state))
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            Ok(())
        }
    }
}

async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    connection_id: ConnectionId,
    credential: Option<String>,
    state: Arc<AppState>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let mut session = Session::new(connection_id, state.hub.clone(), state.store.clone());

    if let Err(e) = session
        .authenticate(&state.verifier, credential.as_deref(), outbound_tx)
        .await
    {
        let (code, reason) = match &e {
            SessionError::Auth(auth) => (auth.close_code(), auth.to_string()),
            other => {
                tracing::error!(
                    connection_id = %session.connection_id(),
                    error = %other,
                    "Failed to admit connection"
                );
                (CLOSE_INTERNAL_ERROR, "Server error".to_string())
            }
        };
        close_with(&mut sender, code, reason).await;
        return;
    }

    let heartbeat = state.heartbeat;
    let mut ping_timer =
        tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut liveness = Liveness::new(heartbeat.timeout);

    loop {
        tokio::select! {
            // Keepalive, and the only way to notice a peer that vanished silently
            _ = ping_timer.tick() => {
                if liveness.is_expired() {
                    tracing::warn!(
                        connection_id = %session.connection_id(),
                        timeout = ?heartbeat.timeout,
                        "Peer went silent, dropping connection"
                    );
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            // Events routed to this connection by the hub
            Some(event) = outbound_rx.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Events sent by this client
            ws_msg = receiver.next() => {
                if let Some(Ok(_)) = &ws_msg {
                    liveness.touch();
                }

                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(
                            connection_id = %session.connection_id(),
                            "Received frame: {}",
                            text
                        );

                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = session.handle(event).await {
                                    tracing::error!(
                                        connection_id = %session.connection_id(),
                                        error = %e,
                                        "Failed to handle client event"
                                    );
                                    let reason = "Server error".to_string();
                                    close_with(&mut sender, CLOSE_INTERNAL_ERROR, reason).await;
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    connection_id = %session.connection_id(),
                                    error = %e,
                                    "Failed to parse client event"
                                );
                                let error = ServerEvent::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid event format: {}", e),
                                };
                                let _ = send_event(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(
                            connection_id = %session.connection_id(),
                            "WebSocket closed"
                        );
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    // The stream reports None on its next poll if the error closed it
                    Some(Err(e)) => session.on_transport_error(&e),
                    None => break,
                }
            }
        }
    }

    session.close();
    tracing::info!(connection_id = %session.connection_id(), "WebSocket connection closed");
}
