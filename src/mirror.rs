//! Peer-side local state
//!
//! The chat history and member list a peer rebuilds from relay messages,
//! plus the observer interface the presentation layer implements to hear
//! about changes.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::message::ErrorCode;
use crate::types::Username;

/// One line of room history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    /// Chat line, rendered as `"<from>: <text>"`
    Chat { from: Username, text: String },
    /// Room notice such as an arrival or departure banner
    Notice(String),
}

impl std::fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryEntry::Chat { from, text } => write!(f, "{}: {}", from, text),
            HistoryEntry::Notice(text) => write!(f, "--- {} ---", text),
        }
    }
}

/// History and membership as seen by one peer
#[derive(Debug, Default)]
pub struct LocalMirror {
    /// Oldest first, append-only
    history: Vec<HistoryEntry>,
    /// Known members, in the order they were announced
    members: Vec<Username>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Add a member; returns false if already known
    pub fn add_member(&mut self, name: Username) -> bool {
        if self.members.contains(&name) {
            return false;
        }
        self.members.push(name);
        true
    }

    /// Remove a member; returns false if not known
    pub fn remove_member(&mut self, name: &Username) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != name);
        self.members.len() != before
    }

    /// Replace the member list with a relay snapshot, dropping repeats
    pub fn set_members(&mut self, members: Vec<Username>) {
        self.members.clear();
        for name in members {
            self.add_member(name);
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn members(&self) -> &[Username] {
        &self.members
    }
}

/// Mirror shared between the peer's loops and the presentation layer
#[derive(Debug, Clone, Default)]
pub struct SharedMirror(Arc<RwLock<LocalMirror>>);

impl SharedMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for reading; a poisoned lock still yields the data
    pub fn read(&self) -> RwLockReadGuard<'_, LocalMirror> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, LocalMirror> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of the history
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read().history().to_vec()
    }

    /// Point-in-time copy of the member list
    pub fn members(&self) -> Vec<Username> {
        self.read().members().to_vec()
    }
}

/// Change notifications for the presentation layer
///
/// Called from the peer's background tasks after the mirror has been
/// updated and its lock released. Implementations must not block; handing
/// the event to a UI thread is the implementation's business. Every method
/// defaults to doing nothing.
pub trait SessionObserver: Send + Sync {
    /// A line was appended to the history
    fn history_appended(&self, _entry: &HistoryEntry) {}

    /// The member list changed; `members` is the new list
    fn members_changed(&self, _members: &[Username]) {}

    /// A private message arrived
    fn direct_message(&self, _from: &Username, _text: &str) {}

    /// A private message could not be delivered
    fn delivery_failed(&self, _recipient: &str) {}

    /// The relay reported an error
    fn relay_error(&self, _code: ErrorCode, _message: &str) {}

    /// The connection has ended
    fn disconnected(&self) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
