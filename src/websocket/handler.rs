use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::types::{ClientMessage, ServerMessage};
use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create a channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let client_id = state.room_manager.register(tx);
    info!("WebSocket client connected: {}", client_id);

    // Forward queued messages (price updates and replies) to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received message from {}: {}", client_id, text);
                handle_message(&state, client_id, &text);
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnecting: {}", client_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by axum
                debug!("Received ping from {}", client_id);
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    state.room_manager.unregister(client_id);
    send_task.abort();
    info!("WebSocket client disconnected: {}", client_id);
}

fn handle_message(state: &AppState, client_id: Uuid, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let error = ServerMessage::Error {
                error: format!("Invalid message: {}", e),
            };
            state.room_manager.send_to(client_id, &error);
            return;
        }
    };

    let response = match msg {
        ClientMessage::Subscribe { symbols } => {
            let known: Vec<i64> = symbols
                .into_iter()
                .filter(|id| state.registry.get(*id).is_some())
                .collect();
            let subscribed = state.room_manager.subscribe(client_id, &known);
            debug!("Client {} subscribed to: {:?}", client_id, subscribed);
            ServerMessage::Subscribed { symbols: subscribed }
        }
        ClientMessage::Unsubscribe { symbols } => {
            let unsubscribed = state.room_manager.unsubscribe(client_id, &symbols);
            debug!("Client {} unsubscribed from: {:?}", client_id, unsubscribed);
            ServerMessage::Unsubscribed {
                symbols: unsubscribed,
            }
        }
    };

    state.room_manager.send_to(client_id, &response);
}
