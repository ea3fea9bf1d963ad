//! WebSocket handler for client sessions.

use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::AppState;

use super::types::{ClientRequest, ServerEvent};

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Serve one client until it disconnects.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut event_rx) = state.hub.register();
    let session_id = session.id();

    if !session.emit(ServerEvent::Connected { session_id }).await {
        state.hub.unregister(session_id);
        return;
    }

    // Writer: drains this session's queue plus periodic pings.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = ping_interval.tick() => ServerEvent::Ping,
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientRequest>(text.as_str()) {
                Ok(request) => {
                    state.dispatcher.dispatch(&session, request);
                }
                Err(e) => {
                    warn!(
                        "Failed to parse request from session {}: {} - {}",
                        session_id,
                        e,
                        text.as_str()
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message from session {}, ignoring", session_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Session {} closed WebSocket connection", session_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error for session {}: {}", session_id, e);
                break;
            }
        }
    }

    // Cancels every request still running for this session.
    state.hub.unregister(session_id);
    send_task.abort();
    info!("WebSocket connection closed for session {}", session_id);
}
