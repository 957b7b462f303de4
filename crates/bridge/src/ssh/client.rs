//! `russh`-backed implementation of the connector traits.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::{Credential, Target, TerminalSize};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tracing::debug;

use super::{ConnectOptions, ShellChannel, ShellEvent, SshClient, SshConnector, SshError};

/// `russh` client callbacks.
///
/// Host keys are accepted without pinning; the algorithm is logged so
/// operators can audit which keys were seen.
pub struct BridgeHandler {
    target: String,
}

impl client::Handler for BridgeHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            remote = %self.target,
            algorithm = server_public_key.algorithm().as_str(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// Connector that opens real SSH connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

impl RusshConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Credential after local parsing, ready to hand to the server.
enum Secret<'a> {
    Password(&'a str),
    Key(PrivateKey),
}

fn parse_credential(credential: &Credential) -> Result<Secret<'_>, SshError> {
    match credential {
        Credential::Password(password) => Ok(Secret::Password(password)),
        Credential::PrivateKey(encoded) => russh::keys::decode_secret_key(encoded, None)
            .map(Secret::Key)
            .map_err(|e| SshError::Auth(format!("invalid private key: {}", e))),
    }
}

fn network(err: russh::Error) -> SshError {
    SshError::Network(err.to_string())
}

async fn authenticate(
    handle: &mut Handle<BridgeHandler>,
    username: &str,
    secret: Secret<'_>,
) -> Result<(), SshError> {
    let (method, result) = match secret {
        Secret::Password(password) => (
            "password",
            handle
                .authenticate_password(username, password)
                .await
                .map_err(network)?,
        ),
        Secret::Key(key) => {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(network)?
                .flatten();
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
            (
                "private key",
                handle
                    .authenticate_publickey(username, key)
                    .await
                    .map_err(network)?,
            )
        }
    };

    if result.success() {
        Ok(())
    } else {
        Err(SshError::Auth(format!("{} rejected by server", method)))
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    type Client = RusshClient;
    type Shell = RusshShell;

    async fn connect(
        &self,
        target: &Target,
        credential: &Credential,
        options: &ConnectOptions,
    ) -> Result<RusshClient, SshError> {
        // Reject unparsable keys before touching the network.
        let secret = parse_credential(credential)?;

        let config = Arc::new(client::Config {
            keepalive_interval: options.keepalive_interval,
            keepalive_max: options.keepalive_count_max,
            ..Default::default()
        });
        let handler = BridgeHandler {
            target: target.to_string(),
        };

        let establish = async {
            let mut handle = client::connect(config, (target.host.as_str(), target.port), handler)
                .await
                .map_err(network)?;
            authenticate(&mut handle, &target.username, secret).await?;
            Ok::<_, SshError>(handle)
        };

        let handle = tokio::time::timeout(options.ready_timeout, establish)
            .await
            .map_err(|_| {
                SshError::Network(format!(
                    "timed out after {}ms",
                    options.ready_timeout.as_millis()
                ))
            })??;

        debug!(remote = %target, "SSH connection authenticated");
        Ok(RusshClient {
            handle,
            disconnected: false,
        })
    }

    async fn open_shell(
        &self,
        client: &mut RusshClient,
        size: TerminalSize,
        term_type: &str,
    ) -> Result<RusshShell, SshError> {
        let shell_err = |e: russh::Error| SshError::Shell(e.to_string());

        let mut channel = client
            .handle
            .channel_open_session()
            .await
            .map_err(shell_err)?;
        let mut pending = VecDeque::new();

        channel
            .request_pty(
                true,
                term_type,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(shell_err)?;
        await_reply(&mut channel, &mut pending, "pseudo-terminal").await?;

        channel.request_shell(true).await.map_err(shell_err)?;
        await_reply(&mut channel, &mut pending, "shell").await?;

        Ok(RusshShell {
            channel,
            pending,
            remote_closed: false,
            closed: false,
        })
    }
}

/// Waits for the reply to a `want_reply` channel request.
///
/// Output that arrives first is buffered so nothing is lost.
async fn await_reply(
    channel: &mut Channel<Msg>,
    pending: &mut VecDeque<ShellEvent>,
    request: &str,
) -> Result<(), SshError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(SshError::Shell(format!("{} request denied", request)))
            }
            None | Some(ChannelMsg::Close) => {
                return Err(SshError::Shell(format!(
                    "channel closed before {} request was answered",
                    request
                )))
            }
            Some(msg) => pending.extend(translate(msg)),
        }
    }
}

/// Maps a channel message to a shell event, ignoring flow-control traffic.
fn translate(msg: ChannelMsg) -> Option<ShellEvent> {
    match msg {
        ChannelMsg::Data { data } => Some(ShellEvent::Stdout(data.to_vec())),
        ChannelMsg::ExtendedData { data, ext: 1 } => Some(ShellEvent::Stderr(data.to_vec())),
        ChannelMsg::ExitStatus { exit_status } => Some(ShellEvent::Exit(exit_status)),
        ChannelMsg::Eof => Some(ShellEvent::Eof),
        _ => None,
    }
}

/// An authenticated `russh` connection.
pub struct RusshClient {
    handle: Handle<BridgeHandler>,
    disconnected: bool,
}

#[async_trait]
impl SshClient for RusshClient {
    async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect failed (connection already gone?): {}", e);
        }
    }
}

/// An interactive shell channel on a `russh` connection.
pub struct RusshShell {
    channel: Channel<Msg>,
    pending: VecDeque<ShellEvent>,
    remote_closed: bool,
    closed: bool,
}

#[async_trait]
impl ShellChannel for RusshShell {
    async fn next_event(&mut self) -> Option<ShellEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.remote_closed {
            return None;
        }

        loop {
            match self.channel.wait().await {
                None | Some(ChannelMsg::Close) => {
                    self.remote_closed = true;
                    return None;
                }
                Some(msg) => {
                    if let Some(event) = translate(msg) {
                        return Some(event);
                    }
                }
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SshError::Stream(e.to_string()))
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), SshError> {
        self.channel
            .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
            .await
            .map_err(|e| SshError::Stream(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Either call fails once the remote has already closed; that is fine.
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
    }
}
