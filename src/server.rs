//! ChatServer Actor implementation
//!
//! The single owner of the session registry. Connection handlers never touch
//! registry state directly; they send `ServerCommand`s over an mpsc channel
//! and the actor applies them one at a time, so registration, binding,
//! broadcast and routing always observe a consistent view.

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::message::ServerMessage;
use crate::registry::Registry;
use crate::session::Session;
use crate::types::{SessionId, Username};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        session_id: SessionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection ended without a logout
    Disconnect { session_id: SessionId },
    /// Claim a username; the reply says whether the connection may stay
    Join {
        session_id: SessionId,
        username: Username,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    /// Chat line for the whole room
    Chat { session_id: SessionId, text: String },
    /// Private message for one user
    Direct {
        session_id: SessionId,
        recipient: String,
        text: String,
    },
    /// Graceful leave
    Logout { session_id: SessionId },
}

/// The main ChatServer actor
///
/// Owns the [`Registry`] and processes commands from connection handlers.
pub struct ChatServer {
    /// Live sessions and usernames
    registry: Registry,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            registry: Registry::new(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { session_id, sender } => {
                self.handle_connect(session_id, sender);
            }
            ServerCommand::Disconnect { session_id } => {
                self.handle_disconnect(session_id);
            }
            ServerCommand::Join {
                session_id,
                username,
                reply,
            } => {
                let result = self.handle_join(session_id, username);
                // Handler may already be gone
                let _ = reply.send(result);
            }
            ServerCommand::Chat { session_id, text } => {
                self.handle_chat(session_id, text);
            }
            ServerCommand::Direct {
                session_id,
                recipient,
                text,
            } => {
                self.handle_direct(session_id, recipient, text);
            }
            ServerCommand::Logout { session_id } => {
                self.handle_logout(session_id);
            }
        }
    }

    /// Handle new connection
    fn handle_connect(&mut self, session_id: SessionId, sender: mpsc::Sender<ServerMessage>) {
        if !self.registry.register(Session::new(session_id, sender)) {
            warn!("Session {} registered twice", session_id);
        }
        debug!(
            "Total sessions: {}, members: {}",
            self.registry.session_count(),
            self.registry.usernames().len()
        );
    }

    /// Handle a connection that ended without logging out
    ///
    /// Peers are told the user left so their member lists match the registry;
    /// no departure banner is shown.
    fn handle_disconnect(&mut self, session_id: SessionId) {
        let Some(session) = self.registry.unregister(session_id) else {
            return;
        };

        if let Some(username) = session.username {
            info!("{} dropped ({})", username, session_id);
            self.registry
                .broadcast(&ServerMessage::MemberLeft { username }, None);
        } else {
            debug!("Unbound session {} removed", session_id);
        }

        debug!(
            "Total sessions: {}, members: {}",
            self.registry.session_count(),
            self.registry.usernames().len()
        );
    }

    /// Handle username binding
    ///
    /// Refusals go back to the handler, which reports them to its peer.
    /// The new member gets one welcome carrying the full member list
    /// (itself included); everyone else gets the arrival banner and a
    /// `MemberJoined` for the newcomer. A welcome that cannot be queued
    /// undoes the binding, so nobody is told about the join.
    fn handle_join(&mut self, session_id: SessionId, username: Username) -> Result<(), AppError> {
        let members = match self.registry.bind_username(session_id, username.clone()) {
            Ok(members) => members,
            Err(e) => {
                info!("Join as '{}' refused for {}: {}", username, session_id, e);
                return Err(e);
            }
        };

        let welcome = ServerMessage::Welcome {
            username: username.clone(),
            members,
        };
        if let Err(e) = self.registry.send_to(session_id, welcome) {
            warn!("Welcome for '{}' not queued ({}), join undone", username, e);
            self.registry.release_username(session_id);
            return Err(AppError::ChannelSend);
        }

        info!("Session {} joined as '{}'", session_id, username);

        self.registry
            .broadcast(&ServerMessage::arrival_notice(&username), Some(session_id));
        self.registry
            .broadcast(&ServerMessage::MemberJoined { username }, Some(session_id));

        Ok(())
    }

    /// Handle chat message
    fn handle_chat(&mut self, session_id: SessionId, text: String) {
        let Some(from) = self.registry.username_of(session_id).cloned() else {
            let _ = self
                .registry
                .send_to(session_id, AppError::NotJoined.into());
            return;
        };

        let delivered = self
            .registry
            .broadcast(&ServerMessage::Chat { from, text }, Some(session_id));
        debug!("Chat from {} delivered to {} sessions", session_id, delivered);
    }

    /// Handle direct message
    ///
    /// An unknown recipient is reported back to the sender.
    fn handle_direct(&mut self, session_id: SessionId, recipient: String, text: String) {
        let Some(from) = self.registry.username_of(session_id).cloned() else {
            let _ = self
                .registry
                .send_to(session_id, AppError::NotJoined.into());
            return;
        };

        let result = Username::parse(recipient.as_str())
            .map_err(|_| AppError::RecipientNotFound(recipient.clone()))
            .and_then(|to| {
                let msg = ServerMessage::Direct { from, to, text };
                self.registry.route(msg, &recipient)
            });

        if let Err(e) = result {
            debug!("Direct message from {} undeliverable: {}", session_id, e);
            let _ = self.registry.send_to(session_id, e.into());
        }
    }

    /// Handle graceful logout
    fn handle_logout(&mut self, session_id: SessionId) {
        let Some(username) = self.registry.username_of(session_id).cloned() else {
            self.registry.unregister(session_id);
            return;
        };

        info!("{} logged out", username);

        self.registry.broadcast(
            &ServerMessage::MemberLeft {
                username: username.clone(),
            },
            Some(session_id),
        );
        self.registry
            .broadcast(&ServerMessage::departure_notice(&username), Some(session_id));
        self.registry.unregister(session_id);
    }
}

/// Start the ChatServer actor and return its command sender
pub fn spawn_relay(config: &RelayConfig) -> mpsc::Sender<ServerCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
    tokio::spawn(ChatServer::new(cmd_rx).run());
    cmd_tx
}

/// Accept connections forever
///
/// Starts the ChatServer actor, then spawns one handler task per accepted
/// connection. Accept failures are logged and the loop keeps going.
pub async fn serve(listener: TcpListener, config: RelayConfig) {
    let cmd_tx = spawn_relay(&config);
    info!("ChatServer actor started");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();
                let outbound_capacity = config.outbound_capacity;

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, outbound_capacity).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    struct TestSession {
        id: SessionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl TestSession {
        async fn connect(cmd_tx: &mpsc::Sender<ServerCommand>) -> Self {
            Self::connect_with_capacity(cmd_tx, 32).await
        }

        async fn connect_with_capacity(
            cmd_tx: &mpsc::Sender<ServerCommand>,
            capacity: usize,
        ) -> Self {
            let (tx, rx) = mpsc::channel(capacity);
            let id = SessionId::new();
            cmd_tx
                .send(ServerCommand::Connect {
                    session_id: id,
                    sender: tx,
                })
                .await
                .unwrap();
            Self { id, rx }
        }

        async fn join(&self, cmd_tx: &mpsc::Sender<ServerCommand>, username: &str) -> Result<(), AppError> {
            let (reply, reply_rx) = oneshot::channel();
            cmd_tx
                .send(ServerCommand::Join {
                    session_id: self.id,
                    username: name(username),
                    reply,
                })
                .await
                .unwrap();
            reply_rx.await.unwrap()
        }

        async fn next(&mut self) -> ServerMessage {
            self.rx.recv().await.unwrap()
        }

        /// Drain everything queued so far
        async fn drain(&mut self, cmd_tx: &mpsc::Sender<ServerCommand>) -> Vec<ServerMessage> {
            sync(cmd_tx).await;
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    /// Round-trip a no-op join so every earlier command has been applied
    async fn sync(cmd_tx: &mpsc::Sender<ServerCommand>) {
        let (reply, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ServerCommand::Join {
                session_id: SessionId::new(),
                username: name("sync-check"),
                reply,
            })
            .await
            .unwrap();
        let _ = reply_rx.await;
    }

    fn start() -> mpsc::Sender<ServerCommand> {
        spawn_relay(&RelayConfig::default())
    }

    #[tokio::test]
    async fn test_join_seeds_members_and_announces() {
        let cmd_tx = start();
        let mut alice = TestSession::connect(&cmd_tx).await;
        let mut bob = TestSession::connect(&cmd_tx).await;

        alice.join(&cmd_tx, "alice").await.unwrap();
        assert_eq!(
            alice.next().await,
            ServerMessage::Welcome {
                username: name("alice"),
                members: vec![name("alice")],
            }
        );
        // Unbound bob still sees the room activity
        assert_eq!(bob.next().await, ServerMessage::arrival_notice(&name("alice")));
        assert_eq!(bob.next().await, ServerMessage::MemberJoined { username: name("alice") });

        bob.join(&cmd_tx, "bob").await.unwrap();
        assert_eq!(
            bob.drain(&cmd_tx).await,
            vec![ServerMessage::Welcome {
                username: name("bob"),
                members: vec![name("alice"), name("bob")],
            }]
        );
        assert_eq!(
            alice.drain(&cmd_tx).await,
            vec![
                ServerMessage::arrival_notice(&name("bob")),
                ServerMessage::MemberJoined { username: name("bob") },
            ]
        );
    }

    #[tokio::test]
    async fn test_welcome_lists_room_larger_than_queue() {
        let cmd_tx = start();
        let mut room = Vec::new();
        for n in ["m1", "m2", "m3", "m4", "m5", "m6"] {
            let session = TestSession::connect(&cmd_tx).await;
            session.join(&cmd_tx, n).await.unwrap();
            room.push(session);
        }

        // Room is bigger than the newcomer's whole queue
        let mut newbie = TestSession::connect_with_capacity(&cmd_tx, 2).await;
        newbie.join(&cmd_tx, "newbie").await.unwrap();

        match newbie.next().await {
            ServerMessage::Welcome { username, members } => {
                assert_eq!(username, name("newbie"));
                let names: Vec<&str> = members.iter().map(Username::as_str).collect();
                assert_eq!(names, vec!["m1", "m2", "m3", "m4", "m5", "m6", "newbie"]);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unqueued_welcome_undoes_join() {
        let cmd_tx = start();
        // Queue of one, filled by the first arrival banner
        let mut stuck = TestSession::connect_with_capacity(&cmd_tx, 1).await;
        let mut bob = TestSession::connect(&cmd_tx).await;
        bob.join(&cmd_tx, "bob").await.unwrap();
        bob.drain(&cmd_tx).await;

        let result = stuck.join(&cmd_tx, "stuck").await;
        assert!(matches!(result, Err(AppError::ChannelSend)));
        // Nobody hears about a join that did not happen
        assert!(bob.drain(&cmd_tx).await.is_empty());
        assert_eq!(stuck.next().await, ServerMessage::arrival_notice(&name("bob")));

        // Name was released
        let other = TestSession::connect(&cmd_tx).await;
        assert!(other.join(&cmd_tx, "stuck").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let cmd_tx = start();
        let alice = TestSession::connect(&cmd_tx).await;
        let mut imposter = TestSession::connect(&cmd_tx).await;

        alice.join(&cmd_tx, "alice").await.unwrap();
        imposter.drain(&cmd_tx).await;

        let result = imposter.join(&cmd_tx, "alice").await;
        assert!(matches!(result, Err(AppError::UsernameTaken(n)) if n == "alice"));
        assert!(imposter.drain(&cmd_tx).await.is_empty());

        // A second join on a bound session is refused too
        let result = alice.join(&cmd_tx, "alias").await;
        assert!(matches!(result, Err(AppError::AlreadyJoined)));
    }

    #[tokio::test]
    async fn test_chat_excludes_sender() {
        let cmd_tx = start();
        let mut alice = TestSession::connect(&cmd_tx).await;
        let mut bob = TestSession::connect(&cmd_tx).await;
        alice.join(&cmd_tx, "alice").await.unwrap();
        bob.join(&cmd_tx, "bob").await.unwrap();
        alice.drain(&cmd_tx).await;
        bob.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Chat {
                session_id: alice.id,
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            bob.drain(&cmd_tx).await,
            vec![ServerMessage::Chat {
                from: name("alice"),
                text: "hello".to_string()
            }]
        );
        assert!(alice.drain(&cmd_tx).await.is_empty());
    }

    #[tokio::test]
    async fn test_chat_before_join_rejected() {
        let cmd_tx = start();
        let mut lurker = TestSession::connect(&cmd_tx).await;
        let mut bob = TestSession::connect(&cmd_tx).await;
        bob.join(&cmd_tx, "bob").await.unwrap();
        bob.drain(&cmd_tx).await;
        lurker.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Chat {
                session_id: lurker.id,
                text: "psst".to_string(),
            })
            .await
            .unwrap();

        let got = lurker.drain(&cmd_tx).await;
        assert!(matches!(
            got.as_slice(),
            [ServerMessage::Error { code: ErrorCode::NotJoined, .. }]
        ));
        assert!(bob.drain(&cmd_tx).await.is_empty());
    }

    #[tokio::test]
    async fn test_direct_to_unknown_recipient_reported() {
        let cmd_tx = start();
        let mut alice = TestSession::connect(&cmd_tx).await;
        alice.join(&cmd_tx, "alice").await.unwrap();
        alice.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Direct {
                session_id: alice.id,
                recipient: "nobody".to_string(),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        let got = alice.drain(&cmd_tx).await;
        assert_eq!(got.len(), 1);
        match &got[0] {
            ServerMessage::Error { code, target, .. } => {
                assert_eq!(*code, ErrorCode::RecipientNotFound);
                assert_eq!(target.as_deref(), Some("nobody"));
            }
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_to_busy_recipient_reported() {
        let cmd_tx = start();
        let mut alice = TestSession::connect(&cmd_tx).await;
        let bob = TestSession::connect_with_capacity(&cmd_tx, 1).await;
        // Bob's welcome fills his queue; nobody reads it
        bob.join(&cmd_tx, "bob").await.unwrap();
        alice.join(&cmd_tx, "alice").await.unwrap();
        alice.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Direct {
                session_id: alice.id,
                recipient: "bob".to_string(),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        let got = alice.drain(&cmd_tx).await;
        assert!(matches!(
            got.as_slice(),
            [ServerMessage::Error { code: ErrorCode::RecipientBusy, .. }]
        ));
    }

    #[tokio::test]
    async fn test_logout_announces_once_and_releases_name() {
        let cmd_tx = start();
        let alice = TestSession::connect(&cmd_tx).await;
        let mut bob = TestSession::connect(&cmd_tx).await;
        alice.join(&cmd_tx, "alice").await.unwrap();
        bob.join(&cmd_tx, "bob").await.unwrap();
        bob.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Logout { session_id: alice.id })
            .await
            .unwrap();
        // Handler always follows up with a disconnect
        cmd_tx
            .send(ServerCommand::Disconnect { session_id: alice.id })
            .await
            .unwrap();

        assert_eq!(
            bob.drain(&cmd_tx).await,
            vec![
                ServerMessage::MemberLeft { username: name("alice") },
                ServerMessage::departure_notice(&name("alice")),
            ]
        );

        // Name is free again
        let again = TestSession::connect(&cmd_tx).await;
        assert!(again.join(&cmd_tx, "alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_announces_without_banner() {
        let cmd_tx = start();
        let alice = TestSession::connect(&cmd_tx).await;
        let mut bob = TestSession::connect(&cmd_tx).await;
        alice.join(&cmd_tx, "alice").await.unwrap();
        bob.join(&cmd_tx, "bob").await.unwrap();
        bob.drain(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Disconnect { session_id: alice.id })
            .await
            .unwrap();

        assert_eq!(
            bob.drain(&cmd_tx).await,
            vec![ServerMessage::MemberLeft { username: name("alice") }]
        );
    }
}
