//! Bridge orchestrator for wiring together all components.
//!
//! This module provides the [`BridgeServer`] that builds the session
//! registry, session manager, message router and health reporter, binds the
//! listener, and coordinates graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::health::HealthReporter;
use crate::network::{self, AppState};
use crate::router::MessageRouter;
use crate::session::{SessionManager, SessionRegistry, SessionSettings};
use crate::ssh::{RusshConnector, SshConnector};

/// Bridge server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// The bridge service: one registry, one manager, one listener.
pub struct BridgeServer<C: SshConnector = RusshConnector> {
    config: Config,
    state: ServerState,
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionManager<C>>,
    router: Arc<MessageRouter<C>>,
    health: Arc<HealthReporter>,
    shutdown_token: CancellationToken,
    server_task: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl BridgeServer<RusshConnector> {
    /// Creates a bridge that opens real SSH connections.
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(RusshConnector::new()))
    }
}

impl<C: SshConnector> BridgeServer<C> {
    /// Creates a bridge using `connector` for outbound SSH.
    pub fn with_connector(config: Config, connector: Arc<C>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            connector,
            Arc::clone(&registry),
            SessionSettings::from(&config),
        ));
        let router = Arc::new(MessageRouter::new(Arc::clone(&sessions)));
        let health = Arc::new(HealthReporter::new(Arc::clone(&registry), &config));

        Self {
            config,
            state: ServerState::Stopped,
            registry,
            sessions,
            router,
            health,
            shutdown_token: CancellationToken::new(),
            server_task: None,
            local_addr: None,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Binds the listener and starts serving. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.state != ServerState::Stopped {
            anyhow::bail!("Bridge server is already running");
        }
        if self.shutdown_token.is_cancelled() {
            anyhow::bail!("Bridge server cannot be restarted after shutdown");
        }
        self.state = ServerState::Starting;

        let addr = self.config.listen_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state = ServerState::Stopped;
                return Err(e).with_context(|| format!("Failed to bind {}", addr));
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        let app = network::app(AppState {
            router: Arc::clone(&self.router),
            health: Arc::clone(&self.health),
            shutdown: self.shutdown_token.clone(),
        });

        let shutdown = self.shutdown_token.clone();
        self.server_task = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }));
        self.local_addr = Some(local_addr);
        self.state = ServerState::Running;

        info!(addr = %local_addr, "WebSSH bridge listening");
        Ok(local_addr)
    }

    /// Stops the bridge gracefully.
    ///
    /// Stops accepting connections, closes every session, and waits up to
    /// the configured grace period for session tasks and the listener.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            ServerState::Stopped => return Ok(()),
            ServerState::ShuttingDown => anyhow::bail!("Bridge server is already shutting down"),
            ServerState::Starting | ServerState::Running => {}
        }
        self.state = ServerState::ShuttingDown;
        info!(
            active_sessions = self.registry.len(),
            "Stopping WebSSH bridge..."
        );

        // Signal shutdown to the listener and every WebSocket loop
        self.shutdown_token.cancel();

        let grace = self.config.shutdown_grace();
        self.sessions.shutdown(grace).await;

        if let Some(task) = self.server_task.take() {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(Ok(()))) => debug!("Listener stopped"),
                Ok(Ok(Err(e))) => warn!("Listener exited with error: {}", e),
                Ok(Err(e)) => warn!("Listener task failed: {}", e),
                Err(_) => warn!("Timed out waiting for listener to stop"),
            }
        }

        self.state = ServerState::Stopped;
        info!("WebSSH bridge stopped");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_manager(&self) -> &Arc<SessionManager<C>> {
        &self.sessions
    }

    pub fn health(&self) -> &Arc<HealthReporter> {
        &self.health
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::MockConnector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.shutdown_grace_secs = 2;
        config
    }

    fn create_test_server() -> BridgeServer<MockConnector> {
        BridgeServer::with_connector(create_test_config(), Arc::new(MockConnector::echo()))
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        http_request(addr, "GET", path, "").await
    }

    async fn http_request(addr: SocketAddr, method: &str, path: &str, headers: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\n{}Connection: close\r\n\r\n",
            method, path, headers
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = create_test_server();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        assert_eq!(server.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = create_test_server();

        let addr = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.shutdown_token().is_cancelled());

        // Stopping twice is a no-op.
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let mut server = create_test_server();
        server.start().await.unwrap();

        assert!(server.start().await.is_err());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop_fails() {
        let mut server = create_test_server();
        server.start().await.unwrap();
        server.stop().await.unwrap();

        assert!(server.start().await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = create_test_config();
        config.server.port = occupied.local_addr().unwrap().port();

        let mut server = BridgeServer::with_connector(config, Arc::new(MockConnector::echo()));
        let err = server.start().await.unwrap_err();

        assert!(err.to_string().contains("Failed to bind"));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_health_endpoint_served() {
        let mut server = create_test_server();
        let addr = server.start().await.unwrap();

        let response = http_get(addr, "/health").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""status":"ok""#));
        assert!(response.contains(r#""activeSessions":0"#));

        let response = http_get(addr, "/sessions").await;
        assert!(response.contains(r#"{"sessions":[]}"#));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cross_origin_requests_allowed() {
        let mut server = create_test_server();
        let addr = server.start().await.unwrap();

        let response = http_request(
            addr,
            "GET",
            "/health",
            "Origin: http://dashboard.example\r\n",
        )
        .await
        .to_ascii_lowercase();
        assert!(response.starts_with("http/1.1 200"));
        assert!(response.contains("access-control-allow-origin: *"));

        let preflight = http_request(
            addr,
            "OPTIONS",
            "/sessions",
            "Origin: http://dashboard.example\r\nAccess-Control-Request-Method: GET\r\n",
        )
        .await
        .to_ascii_lowercase();
        assert!(preflight.starts_with("http/1.1 200"));
        assert!(preflight.contains("access-control-allow-origin: *"));

        server.stop().await.unwrap();
    }
}
