//! Bidirectional session WebSocket endpoint (spec §4.12, §6).
//!
//! Unlike a broadcast feed, every connection here drives its own
//! [`SessionRuntime`]: the socket is split into sender/receiver halves, a
//! writer task drains the runtime's outbound channel onto the wire, and the
//! read loop parses inbound frames and hands them to the runtime without
//! blocking on a full `chat` turn completing.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use warp_core::{InboundMessage, OutboundMessage, SessionId, UserId};
use warp_orchestrator::SessionRuntime;

use crate::state::AppState;

const USER_ID_HEADER: &str = "x-warp-user-id";

/// Read the caller's user id from a transport-layer header. Authentication
/// is out of scope (spec §4.12 Non-goals): a missing or unparsable header
/// falls back to a freshly minted id rather than rejecting the connection.
fn user_id_from_headers(headers: &HeaderMap) -> UserId {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(UserId::now_v7)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    let session_id = SessionId::now_v7();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<OutboundMessage>();

    let runtime = Arc::new(SessionRuntime::new(session_id, user_id, state.deps.clone(), outbound_tx));
    state.sessions.insert(session_id, runtime.clone());
    tracing::info!(%session_id, %user_id, "session connected");

    let mut writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => dispatch_inbound(&runtime, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%session_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            _ = &mut writer_task => break,
        }
    }

    runtime.cancellation().cancel();
    state.sessions.remove(&session_id);
    tracing::info!(%session_id, "session disconnected");
}

/// Parse and hand off one inbound frame without blocking the read loop: a
/// `chat` message runs a whole Designer/Executor/Optimizer turn, and the
/// socket must keep accepting `user_response`/`permission_response` frames
/// that the very same turn is waiting on.
fn dispatch_inbound(runtime: &Arc<SessionRuntime>, text: &str) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.handle_inbound(message).await });
        }
        Err(e) => tracing::warn!(error = %e, "discarding malformed inbound frame"),
    }
}
