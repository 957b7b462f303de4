//! Message router dispatching client frames to the session manager.
//!
//! Every inbound frame is parsed into a [`ClientMessage`] before anything
//! else sees it; malformed frames are answered with an `error` message and
//! never reach the session manager.

use std::sync::Arc;

use protocol::{ClientMessage, ProtocolError, ServerMessage};
use tracing::{debug, warn};

use crate::relay::OutboundSender;
use crate::session::{SessionError, SessionManager};
use crate::ssh::SshConnector;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The frame was not a valid client message.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// The session manager refused the request.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RouterError {
    /// Convert the error to the message shown to the client.
    pub fn to_error_message(&self) -> ServerMessage {
        ServerMessage::error(self)
    }
}

/// Maps each client message type to a [`SessionManager`] operation.
pub struct MessageRouter<C: SshConnector> {
    sessions: Arc<SessionManager<C>>,
}

impl<C: SshConnector> MessageRouter<C> {
    pub fn new(sessions: Arc<SessionManager<C>>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<C>> {
        &self.sessions
    }

    /// Routes a text frame.
    pub async fn route_text(
        &self,
        connection_id: &str,
        text: &str,
        outbound: &OutboundSender,
    ) -> Result<(), RouterError> {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                let err = RouterError::from(e);
                warn!(connection_id, error = %err, "Rejected client frame");
                let _ = outbound.send(err.to_error_message()).await;
                return Err(err);
            }
        };
        self.route(connection_id, message, outbound).await
    }

    /// Routes a binary frame. Raw bytes are always shell input.
    pub async fn route_binary(&self, connection_id: &str, data: Vec<u8>) {
        self.sessions.on_input(connection_id, data).await;
    }

    /// Routes a parsed message.
    pub async fn route(
        &self,
        connection_id: &str,
        message: ClientMessage,
        outbound: &OutboundSender,
    ) -> Result<(), RouterError> {
        match message {
            ClientMessage::Connect(request) => {
                debug!(connection_id, request = ?request, "Connect request");
                self.sessions
                    .on_connect_request(connection_id, request, outbound.clone())
                    .await?;
            }
            ClientMessage::Input(text) => {
                self.sessions
                    .on_input(connection_id, text.into_bytes())
                    .await;
            }
            ClientMessage::Resize(resize) => {
                self.sessions
                    .on_resize(connection_id, resize.rows, resize.cols)
                    .await;
            }
        }
        Ok(())
    }

    /// Tears down whatever the connection owns.
    pub fn disconnect(&self, connection_id: &str) {
        self.sessions.on_disconnect(connection_id);
    }
}
