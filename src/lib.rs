//! Single-Room Chat Relay Library
//!
//! A TCP chat relay and its client session, speaking line-delimited JSON
//! framed with tokio-util's `LinesCodec`.
//!
//! # Features
//! - One shared room with join and leave announcements
//! - Private messages between users
//! - Unique, case-sensitive usernames (duplicates are refused)
//! - Peer session with a local history and member mirror
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels on the relay:
//! - `ChatServer` is the central actor owning the session `Registry`
//! - Each connection has a `handler` task plus a write task draining its
//!   outbound queue
//! - No locks needed - all registry access goes through message passing
//!
//! On the peer, `PeerSession` runs a reader task and a writer task; the
//! presentation layer posts intents and reads mirror snapshots.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use line_relay::{serve, NoopObserver, PeerConfig, PeerSession, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:5000").await?;
//!     tokio::spawn(serve(listener, RelayConfig::default()));
//!
//!     let alice = PeerSession::connect(
//!         PeerConfig::new("alice", "127.0.0.1", 5000),
//!         Arc::new(NoopObserver),
//!     )
//!     .await?;
//!     alice.post_chat("hello")?;
//!     alice.request_logout();
//!     alice.closed().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod mirror;
pub mod peer;
pub mod prompt;
pub mod reader;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;
pub mod writer;

// Re-export main types for convenience
pub use config::{PeerArgs, PeerConfig, RelayArgs, RelayConfig};
pub use error::{AppError, PeerError, SendError};
pub use handler::{handle_connection, HandlerState, SessionHandler};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use mirror::{HistoryEntry, NoopObserver, SessionObserver};
pub use peer::PeerSession;
pub use prompt::{ConnectParams, Prompt};
pub use registry::Registry;
pub use server::{serve, spawn_relay, ChatServer, ServerCommand};
pub use session::Session;
pub use types::{SessionId, Username};
pub use writer::Intent;
