//! Prompts supplied by the presentation layer
//!
//! The core asks these questions synchronously and only sees the answers.

use crate::config::PeerConfig;

/// Answers to the connection prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub username: String,
    pub host: String,
    pub port: u16,
}

impl From<ConnectParams> for PeerConfig {
    fn from(params: ConnectParams) -> Self {
        PeerConfig::new(params.username, params.host, params.port)
    }
}

/// Blocking questions put to the user
///
/// `None` means the user cancelled.
pub trait Prompt {
    /// Username, relay host and relay port
    fn connection_params(&mut self) -> Option<ConnectParams>;

    /// Body of a private message to `recipient`
    fn direct_message_body(&mut self, recipient: &str) -> Option<String>;
}

/// Parse a port answer, rejecting anything outside `1..=65535`
pub fn parse_port(input: &str) -> Option<u16> {
    match input.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}
