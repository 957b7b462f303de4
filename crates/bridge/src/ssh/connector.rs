//! Traits abstracting an SSH client library.

use async_trait::async_trait;
use protocol::{Credential, Target, TerminalSize};

use super::{ConnectOptions, ShellEvent, SshError};

/// Opens authenticated SSH connections and interactive shells on them.
///
/// Implementations must be thread-safe; one connector is shared by every
/// session the bridge runs.
#[async_trait]
pub trait SshConnector: Send + Sync + 'static {
    /// Handle to an authenticated connection.
    type Client: SshClient;
    /// Handle to an interactive shell channel.
    type Shell: ShellChannel;

    /// Connects and authenticates within `options.ready_timeout`.
    ///
    /// Fails with [`SshError::Auth`] when the credential is refused and
    /// [`SshError::Network`] when the host cannot be reached in time.
    async fn connect(
        &self,
        target: &Target,
        credential: &Credential,
        options: &ConnectOptions,
    ) -> Result<Self::Client, SshError>;

    /// Requests a pseudo-terminal and a shell on an open connection.
    ///
    /// Fails with [`SshError::Shell`] when the remote denies either request.
    /// The caller remains responsible for disconnecting `client` on failure.
    async fn open_shell(
        &self,
        client: &mut Self::Client,
        size: TerminalSize,
        term_type: &str,
    ) -> Result<Self::Shell, SshError>;
}

/// An authenticated SSH connection.
#[async_trait]
pub trait SshClient: Send + 'static {
    /// Ends the connection. Safe to call more than once.
    async fn disconnect(&mut self);
}

/// A live shell channel.
#[async_trait]
pub trait ShellChannel: Send + 'static {
    /// Next event from the remote shell, or `None` once the channel is closed.
    ///
    /// Must be cancel safe: it is polled inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<ShellEvent>;

    /// Sends bytes to the shell's stdin.
    async fn write(&mut self, data: &[u8]) -> Result<(), SshError>;

    /// Changes the pseudo-terminal window size.
    async fn resize(&mut self, size: TerminalSize) -> Result<(), SshError>;

    /// Sends EOF and closes the channel. Safe to call more than once.
    async fn close(&mut self);
}
