//! WebSocket endpoint: one client connection per socket.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use protocol::ServerMessage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AppState, OUTBOUND_CAPACITY};
use crate::ssh::SshConnector;

/// How long a closing socket keeps flushing final messages.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn ws_handler<C: SshConnector>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<C>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<C: SshConnector>(socket: WebSocket, state: AppState<C>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "Client connected");

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    // Single writer so messages from the reader loop and the session task
    // reach the socket in the order they were queued.
    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = %writer_id, error = %e, "Dropping unserializable message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(connection_id = %writer_id, "Socket closed while sending");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                // Errors are already reported to the client.
                let _ = state
                    .router
                    .route_text(&connection_id, &text, &outbound)
                    .await;
            }
            Some(Ok(Message::Binary(data))) => {
                state.router.route_binary(&connection_id, data).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    state.router.disconnect(&connection_id);
    drop(outbound);

    // The writer ends once the session task drops its sender too.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    info!(connection_id = %connection_id, "Client disconnected");
}
