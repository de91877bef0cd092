//! TCP connection handler
//!
//! Handles one accepted connection: line framing, message decoding, the
//! per-connection join state machine, and bidirectional communication with
//! the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{decode_line, encode_line, line_codec, ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::{SessionId, Username};

/// Connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerState {
    /// Accepted, no username yet
    Connected,
    /// Username bound in the registry
    Bound(Username),
    /// Logged out, rejected or failed; no more lines are read
    Closed,
}

/// Per-connection protocol state
///
/// Turns decoded client messages into registry commands. Replies that only
/// concern this connection go straight onto its outbound queue.
pub struct SessionHandler {
    session_id: SessionId,
    state: HandlerState,
    cmd_tx: mpsc::Sender<ServerCommand>,
    outbound: mpsc::Sender<ServerMessage>,
}

impl SessionHandler {
    pub fn new(
        session_id: SessionId,
        cmd_tx: mpsc::Sender<ServerCommand>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            session_id,
            state: HandlerState::Connected,
            cmd_tx,
            outbound,
        }
    }

    pub fn state(&self) -> &HandlerState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandlerState::Closed
    }

    /// Apply one raw protocol line
    ///
    /// Undecodable lines close the connection after an error reply.
    pub async fn handle_line(&mut self, line: &str) -> Result<(), AppError> {
        match decode_line::<ClientMessage>(line) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                warn!("Invalid message from {}: {}", self.session_id, e);
                self.reply(AppError::Json(e).into()).await;
                self.state = HandlerState::Closed;
                Ok(())
            }
        }
    }

    /// Apply one decoded client message
    pub async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), AppError> {
        let session_id = self.session_id;

        match msg {
            ClientMessage::Logout => {
                debug!("Logout from {}", session_id);
                self.command(ServerCommand::Logout { session_id }).await?;
                self.state = HandlerState::Closed;
            }
            ClientMessage::Direct { recipient, text } => {
                self.command(ServerCommand::Direct {
                    session_id,
                    recipient,
                    text,
                })
                .await?;
            }
            ClientMessage::Join { username } => {
                self.handle_join(username).await?;
            }
            ClientMessage::Chat { text } => {
                self.command(ServerCommand::Chat { session_id, text }).await?;
            }
        }

        Ok(())
    }

    /// Handle a join request
    ///
    /// A taken or invalid name closes the connection, as does a welcome the
    /// relay could not queue; a repeated join is answered with an error and
    /// otherwise ignored.
    async fn handle_join(&mut self, username: String) -> Result<(), AppError> {
        if matches!(self.state, HandlerState::Bound(_)) {
            self.reply(AppError::AlreadyJoined.into()).await;
            return Ok(());
        }

        let username = match Username::parse(username) {
            Ok(name) => name,
            Err(e) => {
                warn!("Rejected username from {}: {}", self.session_id, e);
                self.reply(e.into()).await;
                self.state = HandlerState::Closed;
                return Ok(());
            }
        };

        let (reply, reply_rx) = oneshot::channel();
        self.command(ServerCommand::Join {
            session_id: self.session_id,
            username: username.clone(),
            reply,
        })
        .await?;

        match reply_rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(()) => {
                self.state = HandlerState::Bound(username);
            }
            Err(e @ (AppError::UsernameTaken(_) | AppError::ChannelSend)) => {
                self.reply(e.into()).await;
                self.state = HandlerState::Closed;
            }
            Err(e) => {
                self.reply(e.into()).await;
            }
        }

        Ok(())
    }

    /// Helper: forward a command to the ChatServer
    async fn command(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.cmd_tx.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }

    /// Helper: queue a message for this connection only
    async fn reply(&self, msg: ServerMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!("Write task gone for {}, reply dropped", self.session_id);
        }
    }
}

/// Handle a new TCP connection
///
/// Registers the session, runs the read loop until logout, rejection or
/// stream failure, then unregisters and waits for queued replies to flush.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    outbound_capacity: usize,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, line_codec());
    let mut writer = FramedWrite::new(write_half, line_codec());

    let session_id = SessionId::new();
    info!("Session {} connected from {}", session_id, peer_addr);

    // Channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbound_capacity);

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            session_id,
            sender: msg_tx.clone(),
        })
        .await
        .is_err()
    {
        error!("Failed to register session {} - server closed", session_id);
        return Err(AppError::ChannelSend);
    }

    // Spawn write task (ServerMessage -> socket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match encode_line(&msg) {
                Ok(line) => {
                    if let Err(e) = writer.send(line).await {
                        debug!("Socket send failed, ending write task: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for session");

        let _ = SinkExt::<String>::close(&mut writer).await;
    });

    let mut handler = SessionHandler::new(session_id, cmd_tx.clone(), msg_tx);

    // Read loop (socket -> ServerCommand)
    let result = loop {
        let line = match lines.next().await {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Over-long line from {}", session_id);
                handler
                    .reply(AppError::Codec(LinesCodecError::MaxLineLengthExceeded).into())
                    .await;
                break Ok(());
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!("Read failed for {}: {}", session_id, e);
                break Ok(());
            }
            None => {
                debug!("Session {} closed the stream", session_id);
                break Ok(());
            }
        };

        if let Err(e) = handler.handle_line(&line).await {
            break Err(e);
        }
        if handler.is_closed() {
            break Ok(());
        }
    };

    // Unregister; a no-op after a logout
    let _ = cmd_tx.send(ServerCommand::Disconnect { session_id }).await;

    // Write task ends once the registry and this handler drop their senders
    drop(handler);
    if write_task.await.is_err() {
        warn!("Write task for {} panicked", session_id);
    }

    info!("Session {} disconnected", session_id);

    result
}
