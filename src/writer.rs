//! Peer writer loop
//!
//! Waits for intents from the presentation layer and sends them to the
//! relay. The loop sleeps on its channel and tokens; nothing is polled.

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::PeerError;
use crate::message::{encode_line, ClientMessage};
use crate::mirror::{HistoryEntry, SessionObserver, SharedMirror};
use crate::reader::append;
use crate::types::Username;

/// Outbound request from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Chat line for the room
    Chat(String),
    /// Private message
    Direct { recipient: String, text: String },
}

/// Everything the writer loop needs besides its socket
pub struct WriterContext {
    pub username: Username,
    pub intents: mpsc::UnboundedReceiver<Intent>,
    /// Cancelled by `request_logout`
    pub logout: CancellationToken,
    /// Cancelled when the connection is gone
    pub closed: CancellationToken,
    pub mirror: SharedMirror,
    pub observer: Arc<dyn SessionObserver>,
}

/// Send intents until logout, connection loss or a send failure
///
/// Logout wins over queued intents. A dropped intent sender counts as
/// logout.
pub async fn writer_loop<W>(mut sink: FramedWrite<W, LinesCodec>, mut ctx: WriterContext)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let intent = tokio::select! {
            biased;
            _ = ctx.logout.cancelled() => {
                logout(&mut sink).await;
                break;
            }
            _ = ctx.closed.cancelled() => {
                debug!("Writer stopping: connection closed");
                break;
            }
            intent = ctx.intents.recv() => match intent {
                Some(intent) => intent,
                None => {
                    debug!("Intent channel dropped, logging out");
                    logout(&mut sink).await;
                    break;
                }
            },
        };

        let msg = match intent {
            Intent::Chat(text) => {
                append(
                    &ctx.mirror,
                    ctx.observer.as_ref(),
                    HistoryEntry::Chat {
                        from: ctx.username.clone(),
                        text: text.clone(),
                    },
                );
                ClientMessage::Chat { text }
            }
            Intent::Direct { recipient, text } => ClientMessage::Direct { recipient, text },
        };

        if let Err(e) = send(&mut sink, &msg).await {
            error!("Send to relay failed: {}", e);
            ctx.closed.cancel();
            break;
        }
    }

    let _ = SinkExt::<String>::close(&mut sink).await;
}

/// Helper: encode and send one message
pub(crate) async fn send<W>(
    sink: &mut FramedWrite<W, LinesCodec>,
    msg: &ClientMessage,
) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(msg)?;
    sink.send(line).await?;
    Ok(())
}

/// Helper: best-effort logout line
async fn logout<W>(sink: &mut FramedWrite<W, LinesCodec>)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = send(sink, &ClientMessage::Logout).await {
        debug!("Logout not sent: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::message::{decode_line, line_codec};
    use crate::mirror::NoopObserver;

    struct Harness {
        intents: mpsc::UnboundedSender<Intent>,
        logout: CancellationToken,
        closed: CancellationToken,
        mirror: SharedMirror,
        /// Relay end of the pipe
        relay: FramedRead<DuplexStream, LinesCodec>,
    }

    impl Harness {
        /// Next line the loop wrote, or None once it has closed the pipe
        async fn next(&mut self) -> Option<ClientMessage> {
            let line = self.relay.next().await?.unwrap();
            Some(decode_line(&line).unwrap())
        }
    }

    /// Run the loop against an in-memory pipe
    fn start() -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let logout = CancellationToken::new();
        let closed = CancellationToken::new();
        let mirror = SharedMirror::new();
        let ctx = WriterContext {
            username: Username::parse("alice").unwrap(),
            intents: rx,
            logout: logout.clone(),
            closed: closed.clone(),
            mirror: mirror.clone(),
            observer: Arc::new(NoopObserver),
        };

        let (client, relay) = tokio::io::duplex(64 * 1024);
        tokio::spawn(writer_loop(FramedWrite::new(client, line_codec()), ctx));

        Harness {
            intents: tx,
            logout,
            closed,
            mirror,
            relay: FramedRead::new(relay, line_codec()),
        }
    }

    #[tokio::test]
    async fn test_chat_then_logout() {
        let mut h = start();
        h.intents.send(Intent::Chat("hello".to_string())).unwrap();
        h.intents
            .send(Intent::Direct {
                recipient: "bob".to_string(),
                text: "psst".to_string(),
            })
            .unwrap();

        assert_eq!(
            h.next().await,
            Some(ClientMessage::Chat {
                text: "hello".to_string()
            })
        );
        assert_eq!(
            h.next().await,
            Some(ClientMessage::Direct {
                recipient: "bob".to_string(),
                text: "psst".to_string()
            })
        );

        // Both intents are on the wire, so logout cannot overtake them
        h.logout.cancel();
        assert_eq!(h.next().await, Some(ClientMessage::Logout));
        assert_eq!(h.next().await, None);

        let history: Vec<String> = h.mirror.history().iter().map(|e| e.to_string()).collect();
        assert_eq!(history, vec!["alice: hello"]);
    }

    #[tokio::test]
    async fn test_closed_connection_stops_without_logout() {
        let mut h = start();
        h.closed.cancel();

        assert_eq!(h.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_sender_logs_out() {
        let mut h = start();
        // Replacing the only sender drops it
        h.intents = mpsc::unbounded_channel().0;

        assert_eq!(h.next().await, Some(ClientMessage::Logout));
        assert_eq!(h.next().await, None);
    }
}
