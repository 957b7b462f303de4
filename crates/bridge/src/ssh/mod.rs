//! Outbound SSH connections.
//!
//! The bridge talks to remote hosts through the [`SshConnector`] trait so the
//! session lifecycle can be driven against a scripted connector in tests. The
//! production implementation, [`RusshConnector`], is built on `russh`.

pub mod client;
pub mod connector;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use thiserror::Error;

pub use client::RusshConnector;
pub use connector::{ShellChannel, SshClient, SshConnector};

/// Errors raised while establishing or using an SSH session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SshError {
    /// The remote host rejected the supplied credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The host was unreachable, the handshake failed, or it timed out.
    #[error("network error: {0}")]
    Network(String),

    /// The remote host refused the pseudo-terminal or shell request.
    #[error("shell request failed: {0}")]
    Shell(String),

    /// I/O on an open shell channel failed.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Settings applied to every outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on TCP connect, key exchange and authentication together.
    pub ready_timeout: Duration,
    /// Keepalive interval; `None` disables keepalives.
    pub keepalive_interval: Option<Duration>,
    /// Missed keepalives tolerated before the connection is considered dead.
    pub keepalive_count_max: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_count_max: 3,
        }
    }
}

/// Something the remote shell produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// Bytes on the shell's stdout.
    Stdout(Vec<u8>),
    /// Bytes on the shell's stderr.
    Stderr(Vec<u8>),
    /// The remote process exited with this status.
    Exit(u32),
    /// The remote side will send no more data.
    Eof,
}
