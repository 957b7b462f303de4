//! Network module for client connections.
//!
//! One axum listener serves everything:
//! - `GET /ws`: WebSocket endpoint, one client connection per socket
//! - `GET /health`: registry snapshot plus effective configuration
//! - `GET /sessions`: registry snapshot only
//!
//! Every route allows cross-origin requests so that embedding pages on
//! other origins can reach the diagnostics and the socket.

pub mod http;
pub mod websocket;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::health::HealthReporter;
use crate::router::MessageRouter;
use crate::ssh::SshConnector;

/// Outbound messages buffered per client before the relay waits.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Shared state handed to every request handler.
pub struct AppState<C: SshConnector> {
    pub router: Arc<MessageRouter<C>>,
    pub health: Arc<HealthReporter>,
    /// Cancelled when the server shuts down; ends every WebSocket loop.
    pub shutdown: CancellationToken,
}

// Derived Clone would require `C: Clone`.
impl<C: SshConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
            health: Arc::clone(&self.health),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Builds the HTTP application.
pub fn app<C: SshConnector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/health", get(http::health::<C>))
        .route("/sessions", get(http::sessions::<C>))
        .route("/ws", get(websocket::ws_handler::<C>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
