//! Session registry
//!
//! Plain state owned by the `ChatServer` actor: live sessions in registration
//! order and bound usernames in join order. Every method is synchronous and
//! never waits on a peer; the actor serializes all access.

use tracing::{debug, warn};

use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::session::Session;
use crate::types::{SessionId, Username};

/// Live sessions and bound usernames
///
/// Invariant: a username is in `usernames` iff exactly one session in
/// `sessions` is bound to it.
#[derive(Debug, Default)]
pub struct Registry {
    /// Registered sessions, oldest first
    sessions: Vec<Session>,
    /// Bound usernames, in join order
    usernames: Vec<Username>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the live set
    ///
    /// Registering an id twice replaces nothing and returns false.
    pub fn register(&mut self, session: Session) -> bool {
        if self.position(session.id).is_some() {
            return false;
        }
        self.sessions.push(session);
        true
    }

    /// Remove a session and release its username
    pub fn unregister(&mut self, id: SessionId) -> Option<Session> {
        let index = self.position(id)?;
        let session = self.sessions.remove(index);
        if let Some(name) = &session.username {
            self.usernames.retain(|n| n != name);
        }
        Some(session)
    }

    /// Bind a username to a registered session
    ///
    /// On success returns every bound username in join order, including the
    /// new one.
    pub fn bind_username(
        &mut self,
        id: SessionId,
        name: Username,
    ) -> Result<Vec<Username>, AppError> {
        let index = self.position(id).ok_or(AppError::SessionNotFound)?;

        if self.sessions[index].is_bound() {
            return Err(AppError::AlreadyJoined);
        }
        if self.usernames.contains(&name) {
            return Err(AppError::UsernameTaken(name.to_string()));
        }

        self.sessions[index].username = Some(name.clone());
        self.usernames.push(name);
        Ok(self.usernames.clone())
    }

    /// Undo a binding; the session stays registered
    pub fn release_username(&mut self, id: SessionId) -> Option<Username> {
        let index = self.position(id)?;
        let name = self.sessions[index].username.take()?;
        self.usernames.retain(|n| n != &name);
        Some(name)
    }

    /// Deliver a message to every session except `exclude`
    ///
    /// Sessions are visited in registration order. A session whose queue is
    /// full or closed misses this message; the others still get it.
    /// Returns the number of sessions the message was queued for.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;
        for session in self.sessions.iter().filter(|s| Some(s.id) != exclude) {
            match session.deliver(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::QueueFull) => {
                    warn!(
                        "Outbound queue full for {} ({}), dropping message",
                        session.id,
                        session.display_name()
                    );
                }
                Err(SendError::ChannelClosed) => {
                    debug!("Session {} already closing, skipped", session.id);
                }
            }
        }
        delivered
    }

    /// Deliver a message to the session bound to `target`
    pub fn route(&self, msg: ServerMessage, target: &str) -> Result<(), AppError> {
        let session = self
            .sessions
            .iter()
            .find(|s| s.username.as_ref().is_some_and(|n| n == target))
            .ok_or_else(|| AppError::RecipientNotFound(target.to_string()))?;

        session.deliver(msg).map_err(|e| {
            warn!("Direct message to {} not queued: {}", target, e);
            match e {
                SendError::QueueFull => AppError::RecipientBusy(target.to_string()),
                SendError::ChannelClosed => AppError::RecipientNotFound(target.to_string()),
            }
        })
    }

    /// Deliver a message to one session by id
    pub fn send_to(&self, id: SessionId, msg: ServerMessage) -> Result<(), SendError> {
        match self.get(id) {
            Some(session) => session.deliver(msg),
            None => Err(SendError::ChannelClosed),
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Username bound to a session, if any
    pub fn username_of(&self, id: SessionId) -> Option<&Username> {
        self.get(id).and_then(|s| s.username.as_ref())
    }

    /// Bound usernames in join order
    pub fn usernames(&self) -> &[Username] {
        &self.usernames
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }
}
