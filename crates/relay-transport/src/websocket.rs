//! WebSocket push of relay events to viewers.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    http::AppState,
    protocol::{ClientMessage, ServerEvent},
};

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let viewer_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Subscribe before listing so nothing falls between init and live events
    let relay = state.relay.clone();
    let mut events = relay.registry().events().stream();
    let _ = tx.send(ServerEvent::Init {
        sessions: relay.list_sessions().await,
    });

    // Ends when the relay shuts down, which closes the socket below
    let events_tx = tx.clone();
    let mut event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = ServerEvent::from_relay(&relay, event).await;
            if events_tx.send(event).is_err() {
                break;
            }
        }
    });

    tracing::info!(%viewer_id, "viewer connected");

    // Handle incoming messages
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = &mut event_task => break,
        };
        let Some(msg) = msg else { break };
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Ping) => {
                let _ = tx.send(ServerEvent::Pong);
            }
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerEvent::Error {
                    message: format!("Invalid message: {e}"),
                });
            }
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::info!(%viewer_id, "viewer disconnected");
}
