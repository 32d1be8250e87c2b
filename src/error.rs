//! Error types for the bridge library.
//!
//! Decoding and dispatch failures are isolated per message: none of these
//! errors stop the bridge, they are logged and the offending message is dropped.

use thiserror::Error;

use crate::session::SubscriptionId;

/// Errors raised while decoding frames coming from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is too short or lacks its start/end markers.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Command byte is not one the bridge understands.
    #[error("unknown message kind 0x{0:02X}")]
    UnknownKind(u8),

    /// Field count does not match the arity of the command.
    #[error("malformed message kind 0x{kind:02X}: expected {expected} fields, got {actual}")]
    MalformedMessage {
        kind: u8,
        expected: usize,
        actual: usize,
    },
}

/// Errors surfaced by an outbound transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has no open output.
    #[error("transport '{0}' is not connected")]
    NotConnected(String),

    /// The underlying port rejected the bytes.
    #[error("send failed: {0}")]
    Send(String),
}

/// Errors reported by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A handle no longer refers to a live entity.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The session refused the mutation.
    #[error("operation rejected: {0}")]
    Rejected(String),

    /// Unsubscribe was called with an id the session never issued.
    #[error("subscription {0:?} is not registered")]
    UnknownSubscription(SubscriptionId),
}
