use std::sync::Arc;

use axum::{
    extract::{Query, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures_util::{StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn, error};

use crate::AppState;
use crate::collab::error::CollabError;
use crate::models::{ClientMessage, ServerMessage};
use crate::services::auth_service::get_handshake_token;
use crate::storage::UserRecord;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// WebSocket handler. The bearer credential is verified before the upgrade
/// completes; a connection that cannot be authenticated never gets a session.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(app_state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    info!("New WebSocket connection attempt");

    let token = get_handshake_token(&headers, query.token).ok_or_else(|| {
        warn!("Rejected WebSocket connection: no credential presented");
        StatusCode::UNAUTHORIZED
    })?;

    let ctx = match app_state.auth.authenticate(&token).await {
        Ok(ctx) => ctx,
        Err(CollabError::AuthenticationFailure(reason)) => {
            warn!("Rejected WebSocket connection: {}", reason);
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            error!("Authentication backend failure: {}", e);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx.user, app_state)))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, user: UserRecord, app_state: Arc<AppState>) {
    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Register with the event router; everything addressed to this
    // connection arrives on rx
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = app_state.router.register(user.clone(), tx).await;

    info!(
        "WebSocket connection established for user {} with connection_id: {}",
        user.username, conn_id
    );

    // Push messages queued for this connection out to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Feed inbound events into the router
    let router = app_state.router.clone();
    let diagrams = app_state.diagrams.clone();
    let username = user.username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(event) => {
                            router.dispatch(conn_id, event, diagrams.as_ref()).await;
                        }
                        Err(e) => {
                            warn!("Failed to parse message from {}: {}", username, e);
                            router
                                .error_reply(
                                    conn_id,
                                    &CollabError::InvalidRequest(
                                        "malformed event payload".to_string(),
                                    ),
                                )
                                .await;
                        }
                    }
                }
                Message::Close(_) => {
                    info!("Client {} requested close", username);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    // Whatever the session touched is handed back: room, locks, cursor
    app_state.router.disconnect(conn_id).await;
    info!("WebSocket connection terminated for connection_id: {}", conn_id);
}
