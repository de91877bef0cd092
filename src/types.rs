//! Basic type definitions for the relay
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier for one accepted connection
//! - `Username`: validated, case-sensitive chat identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Longest accepted username, in characters
pub const MAX_USERNAME_CHARS: usize = 32;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4. One is issued per accepted connection, before the
/// connection has claimed a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat username
///
/// Non-empty, at most [`MAX_USERNAME_CHARS`] characters, no surrounding
/// whitespace and no control characters. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and wrap a username
    pub fn parse(name: impl Into<String>) -> Result<Self, AppError> {
        let name = name.into();

        if name.is_empty() {
            return Err(AppError::InvalidUsername("username is empty".to_string()));
        }
        if name.chars().count() > MAX_USERNAME_CHARS {
            return Err(AppError::InvalidUsername(format!(
                "username is longer than {} characters",
                MAX_USERNAME_CHARS
            )));
        }
        if name.trim() != name {
            return Err(AppError::InvalidUsername(
                "username has leading or trailing whitespace".to_string(),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(AppError::InvalidUsername(
                "username contains control characters".to_string(),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

impl PartialEq<str> for Username {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Username {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
