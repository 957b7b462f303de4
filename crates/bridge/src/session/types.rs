//! The session entity and its lifecycle state.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use protocol::{AuthMethod, Target, TerminalSize};
use serde::Serialize;
use thiserror::Error;

use crate::relay::RelayHandle;
use crate::ssh::SshError;

/// Unique identifier for a session. Generated per connect attempt, never reused.
pub type SessionId = String;

/// Identity of the client connection that owns a session.
pub type ConnectionId = String;

/// Errors raised by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The connect request was rejected before any SSH work.
    #[error(transparent)]
    Validation(#[from] protocol::ValidationError),

    /// The connection already has a session, or an attempt in flight.
    #[error("a session is already active on this connection")]
    AlreadyActive(ConnectionId),

    /// Connecting or opening the shell failed.
    #[error("Connection failed: {0}")]
    Ssh(#[from] SshError),

    /// The client went away before the shell was ready.
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// Lifecycle of a session: `Connecting -> ShellOpen -> Closed`, or
/// `Connecting -> Closed` when the attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    ShellOpen = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::ShellOpen,
            _ => SessionState::Closed,
        }
    }
}

/// One client connection paired with one remote shell.
///
/// The SSH handles themselves live in the session's task; the session only
/// carries the [`RelayHandle`] used to reach them, so nothing here can touch
/// a shell after teardown.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    connection_id: ConnectionId,
    target: Target,
    auth_method: AuthMethod,
    relay: RelayHandle,
    rows: AtomicU16,
    cols: AtomicU16,
    created_at: DateTime<Utc>,
    started: Instant,
    state: AtomicU8,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    pub fn new(
        id: SessionId,
        connection_id: ConnectionId,
        target: Target,
        auth_method: AuthMethod,
        size: TerminalSize,
        relay: RelayHandle,
    ) -> Self {
        Self {
            id,
            connection_id,
            target,
            auth_method,
            relay,
            rows: AtomicU16::new(size.rows),
            cols: AtomicU16::new(size.cols),
            created_at: Utc::now(),
            started: Instant::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::ShellOpen
    }

    /// `Connecting -> ShellOpen`. Returns `false` if the session was not connecting.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::ShellOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Closed`. Returns `true` only for the call that made the transition.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }

    pub fn terminal_size(&self) -> TerminalSize {
        TerminalSize {
            rows: self.rows.load(Ordering::Relaxed),
            cols: self.cols.load(Ordering::Relaxed),
        }
    }

    pub fn set_terminal_size(&self, size: TerminalSize) {
        self.rows.store(size.rows, Ordering::Relaxed);
        self.cols.store(size.cols, Ordering::Relaxed);
    }

    /// Milliseconds since the session was created.
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Read-only view for diagnostics.
    pub fn summary(&self) -> SessionSummary {
        let size = self.terminal_size();
        SessionSummary {
            session_id: self.id.clone(),
            host: self.target.host.clone(),
            port: self.target.port,
            username: self.target.username.clone(),
            auth_method: self.auth_method,
            state: self.state(),
            rows: size.rows,
            cols: size.cols,
            created_at: self.created_at,
            uptime: self.uptime_ms(),
        }
    }
}

/// Serializable snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub state: SessionState,
    pub rows: u16,
    pub cols: u16,
    pub created_at: DateTime<Utc>,
    /// Milliseconds since creation.
    pub uptime: u64,
}
