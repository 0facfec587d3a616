//! Contract with the external transport session.
//!
//! The transport session does connectivity checks, encryption, and data
//! transport. The orchestrator only drives it through descriptions and
//! candidates. Callbacks flowing the other way (local candidates, connection
//! state) are delivered as [`Event`](crate::orchestrator::Event)s on the
//! orchestrator's queue.

use std::fmt;

use frames::{IceCandidate, SessionDescription};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session refused an operation (bad description, wrong signaling state, ...).
    #[error("{op} rejected: {reason}")]
    Rejected { op: &'static str, reason: String },
    /// The session has already been closed.
    #[error("transport session closed")]
    Closed,
}

impl SessionError {
    pub fn rejected(op: &'static str, reason: impl fmt::Display) -> Self {
        Self::Rejected { op, reason: reason.to_string() }
    }
}

/// Connection state reported by the transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Terminal states end the negotiation session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[async_trait::async_trait]
pub trait TransportSession: Send + Sync {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    /// Feed one remote trickled candidate. Duplicates are the session's call.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}
