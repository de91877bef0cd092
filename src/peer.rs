//! Peer session
//!
//! One user's connection to the relay. Construction connects and joins;
//! afterwards a reader task keeps the local mirror current and a writer task
//! sends whatever the presentation layer asks for.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::message::{decode_line, line_codec, ClientMessage, ErrorCode, ServerMessage};
use crate::mirror::{HistoryEntry, SessionObserver, SharedMirror};
use crate::reader::{reader_loop, seed_members};
use crate::types::Username;
use crate::writer::{send, writer_loop, Intent, WriterContext};

/// Client-side session
///
/// Intent setters and accessors take `&self` and never block, so any thread
/// may call them.
pub struct PeerSession {
    username: Username,
    intents: mpsc::UnboundedSender<Intent>,
    logout: CancellationToken,
    closed: CancellationToken,
    mirror: SharedMirror,
}

impl PeerSession {
    /// Connect to the relay and join as `config.username`
    ///
    /// Fails fast: nothing is spawned until the relay has accepted the
    /// username, and there is no retry.
    pub async fn connect(
        config: PeerConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, PeerError> {
        let username = Username::parse(config.username.as_str())
            .map_err(|e| PeerError::InvalidUsername(e.to_string()))?;

        let address = config.address();
        let stream = TcpStream::connect(&address).await?;
        info!("Connected to relay at {}", address);

        let (read_half, write_half) = stream.into_split();
        let mut lines = FramedRead::new(read_half, line_codec());
        let mut sink = FramedWrite::new(write_half, line_codec());

        send(
            &mut sink,
            &ClientMessage::Join {
                username: username.to_string(),
            },
        )
        .await?;

        let members = timeout(config.handshake_timeout, await_welcome(&mut lines, &username))
            .await
            .map_err(|_| PeerError::Timeout)??;
        info!("Joined as {} ({} members)", username, members.len());

        let mirror = SharedMirror::new();
        seed_members(&mirror, observer.as_ref(), members);
        let logout = CancellationToken::new();
        let closed = CancellationToken::new();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();

        tokio::spawn(reader_loop(
            lines,
            mirror.clone(),
            observer.clone(),
            closed.clone(),
        ));
        tokio::spawn(writer_loop(
            sink,
            WriterContext {
                username: username.clone(),
                intents: intent_rx,
                logout: logout.clone(),
                closed: closed.clone(),
                mirror: mirror.clone(),
                observer,
            },
        ));

        Ok(Self {
            username,
            intents: intent_tx,
            logout,
            closed,
            mirror,
        })
    }

    /// Queue a chat line for the room
    pub fn post_chat(&self, text: impl Into<String>) -> Result<(), PeerError> {
        self.post(Intent::Chat(text.into()))
    }

    /// Queue a private message
    pub fn post_direct(
        &self,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), PeerError> {
        self.post(Intent::Direct {
            recipient: recipient.into(),
            text: text.into(),
        })
    }

    /// Ask the writer to log out and close the connection
    ///
    /// Takes priority over intents still queued. Calling it again is harmless.
    pub fn request_logout(&self) {
        self.logout.cancel();
    }

    /// Snapshot of the chat history, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.mirror.history()
    }

    /// Snapshot of the member list
    pub fn members(&self) -> Vec<Username> {
        self.mirror.members()
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// True once the connection has ended
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the connection has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn post(&self, intent: Intent) -> Result<(), PeerError> {
        if self.is_closed() || self.logout.is_cancelled() {
            return Err(PeerError::Closed);
        }
        self.intents.send(intent).map_err(|_| PeerError::Closed)
    }
}

/// Read until the relay accepts or refuses the join
///
/// Returns the member list carried by the welcome. Room traffic that
/// arrives first is skipped; the welcome's snapshot already covers it.
async fn await_welcome(
    lines: &mut FramedRead<OwnedReadHalf, LinesCodec>,
    username: &Username,
) -> Result<Vec<Username>, PeerError> {
    loop {
        let line = match lines.next().await {
            Some(line) => line?,
            None => {
                return Err(PeerError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "relay closed the connection during join",
                )))
            }
        };

        match decode_line::<ServerMessage>(&line)? {
            ServerMessage::Welcome { members, .. } => return Ok(members),
            ServerMessage::Error {
                code: ErrorCode::UsernameTaken,
                ..
            } => return Err(PeerError::DuplicateUsername(username.to_string())),
            ServerMessage::Error { code, message, .. } => {
                return Err(PeerError::Rejected { code, message })
            }
            other => debug!("Skipping {:?} before welcome", other),
        }
    }
}
