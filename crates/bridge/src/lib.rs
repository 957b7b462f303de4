//! # WebSSH Bridge Library
//!
//! This crate provides the WebSSH bridge service: browser terminals connect
//! over a WebSocket, and each connection is paired with exactly one outbound
//! SSH session running an interactive shell.
//!
//! ## Overview
//!
//! - **Session Management**: connect, input, resize and teardown with a
//!   `Connecting -> ShellOpen -> Closed` state machine
//! - **SSH Connector**: authenticated connections and pseudo-terminal shells
//!   via `russh`, behind a trait so tests can script the remote side
//! - **Relay**: ordered byte pumping between socket and shell
//! - **Diagnostics**: `/health` and `/sessions` snapshots of the registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Bridge Server                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐  │
//! │  │  WebSocket   │──▶│  Message Router  │──▶│    Session     │  │
//! │  │   /ws        │   └──────────────────┘   │    Manager     │  │
//! │  └──────────────┘                          └───────┬────────┘  │
//! │  ┌──────────────┐   ┌──────────────────┐           │           │
//! │  │ /health      │──▶│ Health Reporter  │   ┌───────▼────────┐  │
//! │  │ /sessions    │   └────────┬─────────┘   │ SSH Connector  │  │
//! │  └──────────────┘            │             │    + Relay     │  │
//! │                     ┌────────▼─────────┐   └────────────────┘  │
//! │                     │ Session Registry │                       │
//! │                     └──────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{BridgeServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut server = BridgeServer::new(config);
//!     server.start().await?;
//!
//!     // Wait for a shutdown signal...
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, env overrides and validation
//! - [`session`]: Session entity, registry and lifecycle manager
//! - [`ssh`]: SSH connector traits and the `russh` implementation
//! - [`relay`]: Byte relay between client and shell
//! - [`router`]: Client message dispatch
//! - [`health`]: Diagnostic snapshots
//! - [`network`]: axum routes and the WebSocket endpoint
//! - [`orchestrator`]: Main bridge coordinator

pub mod config;
pub mod health;
pub mod network;
pub mod orchestrator;
pub mod relay;
pub mod router;
pub mod session;
pub mod ssh;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use health::{HealthReport, HealthReporter, SessionsReport};
pub use orchestrator::{BridgeServer, ServerState};
pub use relay::{OutboundSender, Relay, RelayExit, RelayHandle};
pub use router::{MessageRouter, RouterError};
pub use session::{
    ConnectionId, Session, SessionError, SessionId, SessionManager, SessionRegistry,
    SessionSettings, SessionState, SessionSummary,
};
pub use ssh::{
    ConnectOptions, RusshConnector, ShellChannel, ShellEvent, SshClient, SshConnector, SshError,
};
