//! Protocol message definitions for the WebSSH bridge.
//!
//! Every WebSocket text frame carries one JSON message. Messages are
//! adjacently tagged: `{"type": "connect", "data": {...}}`. Unit messages such
//! as `close` carry no `data` field at all.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result, ValidationError};

/// Port used when a connect request does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Terminal type requested for every interactive shell.
pub const DEFAULT_TERM_TYPE: &str = "xterm-256color";

/// Messages sent by the browser client to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Open an SSH session with an interactive shell.
    Connect(ConnectRequest),
    /// Keystrokes or pasted text for the shell.
    Input(String),
    /// Terminal window size changed.
    Resize(ResizeRequest),
}

impl ClientMessage {
    /// Parse a client message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent by the bridge to the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The shell is open; the client may start sending input.
    Ready(Ready),
    /// A chunk of shell stdout or stderr.
    Data(String),
    /// Validation, authentication, shell or stream failure.
    Error(String),
    /// The session ended; the client should stop sending input.
    Close,
}

impl ServerMessage {
    /// Build an error message from anything displayable.
    pub fn error(message: impl fmt::Display) -> Self {
        ServerMessage::Error(message.to_string())
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a server message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Payload of the `ready` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    /// Identifier of the newly opened session.
    pub session_id: String,
}

/// Payload of a `connect` request as received on the wire.
///
/// Every field is optional at this stage so that a missing host or username
/// surfaces as a [`ValidationError`] rather than a parse failure.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// A number or a numeric string; range is checked by [`validate`](Self::validate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Initial terminal columns; falls back to the bridge default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    /// Initial terminal rows; falls back to the bridge default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .finish()
    }
}

/// Treats `None` and `""` alike.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl ConnectRequest {
    /// Build a password request.
    pub fn with_password(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Build a private-key request.
    pub fn with_private_key(host: &str, username: &str, private_key: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            username: Some(username.to_string()),
            private_key: Some(private_key.to_string()),
            ..Self::default()
        }
    }

    /// Check the request and split it into a target and exactly one credential.
    pub fn validate(&self) -> std::result::Result<ConnectParams, ValidationError> {
        let host = present(&self.host).ok_or(ValidationError::MissingHost)?;
        let username = present(&self.username).ok_or(ValidationError::MissingUsername)?;

        let credential = match (present(&self.password), present(&self.private_key)) {
            (Some(password), None) => Credential::Password(password.to_string()),
            (None, Some(key)) => Credential::PrivateKey(key.to_string()),
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousCredential),
            (None, None) => return Err(ValidationError::MissingCredential),
        };

        let port = match &self.port {
            Some(field) => field.resolve().ok_or(ValidationError::InvalidPort)?,
            None => DEFAULT_SSH_PORT,
        };

        if self.rows == Some(0) || self.cols == Some(0) {
            return Err(ValidationError::InvalidTerminalSize);
        }

        Ok(ConnectParams {
            target: Target {
                host: host.to_string(),
                port,
                username: username.to_string(),
            },
            credential,
            rows: self.rows,
            cols: self.cols,
        })
    }
}

/// Port of a connect request as it arrives on the wire.
///
/// Browser widgets often send the port straight from a text input, so
/// `"2222"` is accepted alongside `2222`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    Number(i64),
    Text(String),
}

impl PortField {
    /// The port, or `None` when it is not in `1..=65535`. A blank string
    /// means the default port.
    fn resolve(&self) -> Option<u16> {
        let value = match self {
            PortField::Number(n) => *n,
            PortField::Text(text) if text.trim().is_empty() => return Some(DEFAULT_SSH_PORT),
            PortField::Text(text) => text.trim().parse::<i64>().ok()?,
        };
        u16::try_from(value).ok().filter(|port| *port != 0)
    }
}

impl From<u16> for PortField {
    fn from(port: u16) -> Self {
        PortField::Number(port.into())
    }
}

/// A validated connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub target: Target,
    pub credential: Credential,
    rows: Option<u16>,
    cols: Option<u16>,
}

impl ConnectParams {
    /// Initial terminal size, filling unspecified dimensions from `default`.
    pub fn terminal_size(&self, default: TerminalSize) -> TerminalSize {
        TerminalSize {
            rows: self.rows.unwrap_or(default.rows),
            cols: self.cols.unwrap_or(default.cols),
        }
    }
}

/// The remote end of an SSH session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Exactly one way of authenticating to the remote host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication.
    Password(String),
    /// Public-key authentication with a PEM/OpenSSH encoded private key.
    PrivateKey(String),
}

impl Credential {
    /// The kind of credential, without the secret.
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password(_) => AuthMethod::Password,
            Credential::PrivateKey(_) => AuthMethod::PrivateKey,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// Authentication method used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    Password,
    PrivateKey,
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    /// Create a size from raw client dimensions.
    ///
    /// Returns `None` if either dimension is non-positive or does not fit a
    /// terminal cell count.
    pub fn from_dimensions(rows: i64, cols: i64) -> Option<Self> {
        let rows = u16::try_from(rows).ok().filter(|r| *r > 0)?;
        let cols = u16::try_from(cols).ok().filter(|c| *c > 0)?;
        Some(Self { rows, cols })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Payload of a `resize` request.
///
/// Dimensions are signed so that nonsense values parse and are then ignored
/// instead of failing the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub rows: i64,
    pub cols: i64,
}
