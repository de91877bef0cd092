//! Error types for the relay and the peer
//!
//! Defines relay-side application errors, per-session send errors and
//! peer-side connection errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::message::ErrorCode;

/// Relay application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Line framing error: over-long line or invalid UTF-8 (fatal)
    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Username is already bound to another session
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Username failed validation
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Chat or direct message sent before joining
    #[error("Join required")]
    NotJoined,

    /// Session already has a username
    #[error("Already joined")]
    AlreadyJoined,

    /// Direct message recipient is not connected
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Direct message recipient's outbound queue is full
    #[error("Recipient busy: {0}")]
    RecipientBusy(String),

    /// Registry has no session with this id
    #[error("Session not found")]
    SessionNotFound,
}

/// Message send errors
///
/// Occurs when a session's outbound queue cannot accept a message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The session's outbound queue is full (slow peer)
    #[error("Outbound queue full")]
    QueueFull,
}

/// Peer-side errors
///
/// Returned by `PeerSession` construction and intent setters.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Connect, read or write failure on the relay connection
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Line framing error
    #[error("Line codec error: {0}")]
    Codec(LinesCodecError),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The relay refused the username because another session holds it
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    /// The username was rejected locally before connecting
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// The relay rejected the join for another reason
    #[error("Relay rejected join ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The relay did not answer the join in time
    #[error("Timed out waiting for the relay")]
    Timeout,

    /// The connection has ended; no more intents are accepted
    #[error("Session closed")]
    Closed,
}

/// Socket failures inside the codec are connection errors
impl From<LinesCodecError> for PeerError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => PeerError::Connection(e),
            other => PeerError::Codec(other),
        }
    }
}
