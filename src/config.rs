//! Runtime configuration
//!
//! `clap` parsers for the two binaries and the plain config structs the
//! library consumes. Every flag can also be set through the environment.

use std::time::Duration;

use clap::Parser;

/// Default relay address
pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";

/// Default channel buffer size for registry commands
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Default per-session outbound queue length
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default time a peer waits for the relay to accept its join
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Registry command channel capacity
    pub command_capacity: usize,
    /// Per-session outbound queue capacity
    pub outbound_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Peer connection settings
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub username: String,
    pub host: String,
    pub port: u16,
    /// How long to wait for the relay's answer to the join
    pub handshake_timeout: Duration,
}

impl PeerConfig {
    pub fn new(username: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
            port,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// `host:port` string for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Command line for `line-relay`
#[derive(Debug, Parser)]
#[command(name = "line-relay")]
#[command(about = "Single-room chat relay")]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(default_value = DEFAULT_ADDR, env = "LINE_RELAY_ADDR")]
    pub addr: String,

    /// Per-session outbound queue length
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY, env = "LINE_RELAY_OUTBOUND_CAPACITY")]
    pub outbound_capacity: usize,

    /// Registry command channel length
    #[arg(long, default_value_t = DEFAULT_COMMAND_CAPACITY, env = "LINE_RELAY_COMMAND_CAPACITY")]
    pub command_capacity: usize,
}

impl RelayArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            command_capacity: self.command_capacity,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

/// Command line for `line-peer`
///
/// Anything left out is asked for interactively.
#[derive(Debug, Parser)]
#[command(name = "line-peer")]
#[command(about = "Terminal client for the chat relay")]
pub struct PeerArgs {
    /// Username to join as
    #[arg(short, long, env = "LINE_PEER_USERNAME")]
    pub username: Option<String>,

    /// Relay host
    #[arg(short = 'H', long, env = "LINE_PEER_HOST")]
    pub host: Option<String>,

    /// Relay port
    #[arg(short, long, env = "LINE_PEER_PORT")]
    pub port: Option<u16>,

    /// Seconds to wait for the relay to accept the join
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
    pub handshake_timeout: u64,
}
