//! # WebSSH Bridge Protocol Library
//!
//! This crate defines the message contract between browser terminal clients
//! and the WebSSH bridge.
//!
//! ## Overview
//!
//! The protocol is deliberately small. A client opens a WebSocket, sends one
//! `connect` request, then streams `input` and `resize` messages. The bridge
//! answers with `ready`, a stream of `data`, and finally `close`, with `error`
//! whenever something goes wrong.
//!
//! ```text
//!  client                         bridge
//!    │ ── connect {host,...} ──────▶ │
//!    │ ◀───────── ready {sessionId} ─ │
//!    │ ── input "ls\n" ────────────▶ │
//!    │ ◀──────────────── data "..." ─ │
//!    │ ── resize {rows,cols} ──────▶ │
//!    │ ◀──────────────────── close ── │
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let message = ClientMessage::from_json(
//!     r#"{"type":"connect","data":{"host":"10.0.0.5","username":"ops","password":"pw"}}"#,
//! )
//! .unwrap();
//!
//! if let ClientMessage::Connect(request) = message {
//!     let params = request.validate().unwrap();
//!     assert_eq!(params.target.port, 22);
//! }
//!
//! assert_eq!(ServerMessage::Close.to_json().unwrap(), r#"{"type":"close"}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Wire messages and connect-request validation
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result, ValidationError};
pub use messages::{
    AuthMethod, ClientMessage, ConnectParams, ConnectRequest, Credential, PortField, Ready,
    ResizeRequest, ServerMessage, Target, TerminalSize, DEFAULT_SSH_PORT, DEFAULT_TERM_TYPE,
};
