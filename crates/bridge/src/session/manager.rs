//! Session manager driving the connect/input/resize/teardown lifecycle.
//!
//! Each accepted connect request gets one task from the manager's
//! [`TaskTracker`]. That task connects, opens the shell, registers the
//! session and then runs its [`Relay`] until the session ends, so all SSH
//! handles stay owned by a single task.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{ConnectParams, ConnectRequest, Ready, ServerMessage, TerminalSize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::SessionRegistry;
use super::types::{ConnectionId, Session, SessionError, SessionId};
use crate::config::Config;
use crate::relay::{self, OutboundSender, Relay, RelayExit};
use crate::ssh::{ConnectOptions, ShellChannel, SshClient, SshConnector, SshError};

/// Commands queued per session before input applies backpressure.
const RELAY_QUEUE_CAPACITY: usize = 256;

/// Settings the manager applies to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Used when a connect request omits rows or cols.
    pub default_size: TerminalSize,
    /// `TERM` requested with the pseudo-terminal.
    pub term_type: String,
    pub connect: ConnectOptions,
    /// Log shell input and output at debug level.
    pub log_io: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_size: config.default_terminal_size(),
            term_type: config.terminal.term_type.clone(),
            connect: ConnectOptions {
                ready_timeout: config.ready_timeout(),
                keepalive_interval: config.keepalive_interval(),
                keepalive_count_max: config.ssh.keepalive_count_max,
            },
            log_io: config.logging.log_ssh_io,
        }
    }
}

/// A connect attempt that has not reached `ShellOpen` yet.
#[derive(Debug)]
struct PendingConnect {
    session_id: SessionId,
    cancel: CancellationToken,
}

/// Orchestrates sessions for every client connection.
pub struct SessionManager<C: SshConnector> {
    connector: Arc<C>,
    registry: Arc<SessionRegistry>,
    settings: SessionSettings,
    pending: DashMap<ConnectionId, PendingConnect>,
    tasks: TaskTracker,
}

impl<C: SshConnector> SessionManager<C> {
    /// Creates a manager that registers sessions in `registry`.
    pub fn new(connector: Arc<C>, registry: Arc<SessionRegistry>, settings: SessionSettings) -> Self {
        Self {
            connector,
            registry,
            settings,
            pending: DashMap::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Number of sessions with an open shell.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of connect attempts still in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Handles a `connect` request from `connection_id`.
    ///
    /// Validation failures and duplicate requests are answered immediately
    /// with an `error` message. Otherwise the attempt continues in the
    /// background and the new session id is returned; the client hears
    /// `ready` or `error` once the attempt resolves.
    pub async fn on_connect_request(
        self: &Arc<Self>,
        connection_id: &str,
        request: ConnectRequest,
        outbound: OutboundSender,
    ) -> Result<SessionId, SessionError> {
        let params = match request.validate() {
            Ok(params) => params,
            Err(e) => {
                warn!(connection_id, error = %e, "Rejected connect request");
                let _ = outbound.send(ServerMessage::error(&e)).await;
                return Err(e.into());
            }
        };

        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        // The registry is checked while the pending entry is held. A session
        // task registers before it releases its pending entry, so a vacant
        // entry with an empty registry slot means the connection is free.
        let claimed = match self.pending.entry(connection_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(_) if self.registry.get(connection_id).is_some() => false,
            Entry::Vacant(entry) => {
                entry.insert(PendingConnect {
                    session_id: session_id.clone(),
                    cancel: cancel.clone(),
                });
                true
            }
        };
        if !claimed {
            let err = SessionError::AlreadyActive(connection_id.to_string());
            warn!(connection_id, "Connect request on a connection that already has a session");
            let _ = outbound.send(ServerMessage::error(&err)).await;
            return Err(err);
        }

        info!(
            connection_id,
            session_id = %session_id,
            remote = %params.target,
            auth_method = ?params.credential.method(),
            "Connecting"
        );

        let manager = Arc::clone(self);
        let connection_id = connection_id.to_string();
        let id = session_id.clone();
        self.tasks.spawn(async move {
            manager
                .run_session(connection_id, id, params, outbound, cancel)
                .await;
        });

        Ok(session_id)
    }

    /// Body of a session's task: connect, open the shell, relay, clean up.
    async fn run_session(
        self: Arc<Self>,
        connection_id: ConnectionId,
        session_id: SessionId,
        params: ConnectParams,
        outbound: OutboundSender,
        cancel: CancellationToken,
    ) {
        let size = params.terminal_size(self.settings.default_size);
        let (relay_handle, inbox) = relay::channel(RELAY_QUEUE_CAPACITY);
        let session = Arc::new(Session::new(
            session_id.clone(),
            connection_id.clone(),
            params.target.clone(),
            params.credential.method(),
            size,
            relay_handle,
        ));

        let established = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.establish(&params, size) => result.map_err(SessionError::from),
        };

        let (mut client, mut shell) = match established {
            Ok(handles) => handles,
            Err(e) => {
                self.pending
                    .remove_if(&connection_id, |_, p| p.session_id == session_id);
                session.mark_closed();
                if e == SessionError::Cancelled {
                    info!(session_id = %session_id, "Connect attempt cancelled by client disconnect");
                } else {
                    warn!(session_id = %session_id, error = %e, "Connect attempt failed");
                    let _ = outbound.send(ServerMessage::error(&e)).await;
                }
                return;
            }
        };

        session.mark_open();
        if let Err(e) = self.registry.put(Arc::clone(&session)) {
            warn!(session_id = %session_id, error = %e, "Could not register session");
            self.pending
                .remove_if(&connection_id, |_, p| p.session_id == session_id);
            session.mark_closed();
            shell.close().await;
            client.disconnect().await;
            let _ = outbound.send(ServerMessage::error(&e)).await;
            return;
        }
        self.pending
            .remove_if(&connection_id, |_, p| p.session_id == session_id);

        // The client may have left between the shell opening and registration.
        if cancel.is_cancelled() {
            info!(session_id = %session_id, "Client left before the session became ready");
            self.registry.remove_session(&connection_id, &session_id);
            session.mark_closed();
            shell.close().await;
            client.disconnect().await;
            return;
        }

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            rows = size.rows,
            cols = size.cols,
            "Session ready"
        );
        let _ = outbound
            .send(ServerMessage::Ready(Ready {
                session_id: session_id.clone(),
            }))
            .await;

        let exit = Relay::attach(
            session_id.clone(),
            shell,
            inbox,
            outbound.clone(),
            self.settings.log_io,
        )
        .run()
        .await;

        client.disconnect().await;
        self.finish(&session, exit, &outbound).await;
    }

    /// Connects and opens the shell, disconnecting again if the shell is refused.
    async fn establish(
        &self,
        params: &ConnectParams,
        size: TerminalSize,
    ) -> Result<(C::Client, C::Shell), SshError> {
        let mut client = self
            .connector
            .connect(&params.target, &params.credential, &self.settings.connect)
            .await?;

        match self
            .connector
            .open_shell(&mut client, size, &self.settings.term_type)
            .await
        {
            Ok(shell) => Ok((client, shell)),
            Err(e) => {
                client.disconnect().await;
                Err(e)
            }
        }
    }

    /// Final bookkeeping once a session's relay has stopped.
    async fn finish(&self, session: &Session, exit: RelayExit, outbound: &OutboundSender) {
        self.registry
            .remove_session(session.connection_id(), session.id());
        let first = session.mark_closed();

        match &exit {
            RelayExit::LocalClose => {
                debug!(session_id = %session.id(), "Session closed locally");
            }
            RelayExit::RemoteClose { exit_status } => {
                info!(session_id = %session.id(), exit_status = ?exit_status, "Remote closed session");
            }
            RelayExit::StreamError(e) => {
                let _ = outbound.send(ServerMessage::error(e)).await;
            }
            RelayExit::ClientGone => {
                debug!(session_id = %session.id(), "Client gone; session closed");
            }
        }

        if exit != RelayExit::ClientGone {
            let _ = outbound.send(ServerMessage::Close).await;
        }
        if first {
            info!(
                session_id = %session.id(),
                uptime_ms = session.uptime_ms(),
                "Session closed"
            );
        }
    }

    /// Forwards input to the connection's shell.
    ///
    /// Input for a connection without an open session is dropped: the
    /// client may simply be racing teardown.
    pub async fn on_input(&self, connection_id: &str, data: Vec<u8>) {
        match self.registry.get(connection_id) {
            Some(session) if session.is_open() => {
                if !session.relay().write(data).await {
                    debug!(connection_id, "Dropping input; shell already closed");
                }
            }
            _ => debug!(connection_id, bytes = data.len(), "Dropping input; no open session"),
        }
    }

    /// Resizes the connection's terminal. Non-positive dimensions are ignored.
    ///
    /// Returns the applied size.
    pub async fn on_resize(&self, connection_id: &str, rows: i64, cols: i64) -> Option<TerminalSize> {
        let session = self.registry.get(connection_id).filter(|s| s.is_open());
        let Some(session) = session else {
            debug!(connection_id, "Dropping resize; no open session");
            return None;
        };

        let size = session.relay().resize(rows, cols).await?;
        session.set_terminal_size(size);
        Some(size)
    }

    /// Tears down whatever the connection owns. Safe to call repeatedly.
    pub fn on_disconnect(&self, connection_id: &str) {
        // Cancel while holding the entry so a session task finishing its
        // connect either sees the cancellation or has already registered.
        if let Some(pending) = self.pending.get(connection_id) {
            debug!(connection_id, session_id = %pending.session_id, "Cancelling connect attempt");
            pending.cancel.cancel();
        }

        if let Some(session) = self.registry.remove(connection_id) {
            self.teardown(&session, "client disconnected");
        }
    }

    fn teardown(&self, session: &Session, reason: &str) {
        if session.mark_closed() {
            info!(session_id = %session.id(), reason, "Tearing down session");
        }
        session.relay().close();
    }

    /// Closes every session and waits up to `grace` for their tasks.
    pub async fn shutdown(&self, grace: Duration) {
        for pending in self.pending.iter() {
            pending.cancel.cancel();
        }
        for session in self.registry.drain() {
            self.teardown(&session, "server shutting down");
        }

        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Timed out waiting for sessions to close"
            );
        } else {
            info!("All sessions closed");
        }
    }
}
