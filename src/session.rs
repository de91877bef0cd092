//! Session struct definition
//!
//! Represents one accepted connection with its username binding and
//! outbound message queue.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{SessionId, Username};

/// Relay-side session
///
/// Holds the connection's unique ID, the username once bound, and the
/// sending end of the queue drained by the connection's write task.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this connection
    pub id: SessionId,
    /// Username (None before join)
    pub username: Option<Username>,
    /// Server → Client message queue
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Session {
    /// Create a new unbound session with the given ID and sender channel
    pub fn new(id: SessionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            username: None,
            sender,
        }
    }

    /// Queue a message for this session without waiting
    ///
    /// A full queue fails immediately so one slow peer never stalls the
    /// caller.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this session
    ///
    /// Returns the username if bound, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_ref().map(Username::as_str).unwrap_or("Unknown")
    }

    /// Check if this session has bound a username
    pub fn is_bound(&self) -> bool {
        self.username.is_some()
    }
}
