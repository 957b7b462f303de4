//! Session management module.
//!
//! A session pairs one client connection with one remote interactive shell.
//! The [`SessionManager`] owns the lifecycle; the [`SessionRegistry`] holds
//! the sessions whose shell is open.

pub mod manager;
pub mod registry;
pub mod types;

pub use manager::{SessionManager, SessionSettings};
pub use registry::SessionRegistry;
pub use types::{ConnectionId, Session, SessionError, SessionId, SessionState, SessionSummary};
