//! Peer reader loop
//!
//! Decodes relay lines and applies them to the local mirror.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::{decode_line, ErrorCode, ServerMessage};
use crate::mirror::{HistoryEntry, SessionObserver, SharedMirror};
use crate::types::Username;

/// Apply one relay message to the mirror and notify the observer
pub fn apply_message(mirror: &SharedMirror, observer: &dyn SessionObserver, msg: ServerMessage) {
    match msg {
        ServerMessage::MemberJoined { username } => {
            let members = {
                let mut state = mirror.write();
                if !state.add_member(username) {
                    return;
                }
                state.members().to_vec()
            };
            observer.members_changed(&members);
        }
        ServerMessage::MemberLeft { username } => {
            let members = {
                let mut state = mirror.write();
                if !state.remove_member(&username) {
                    return;
                }
                state.members().to_vec()
            };
            observer.members_changed(&members);
        }
        ServerMessage::Direct { from, text, .. } => {
            observer.direct_message(&from, &text);
        }
        ServerMessage::Chat { from, text } => {
            append(mirror, observer, HistoryEntry::Chat { from, text });
        }
        ServerMessage::Notice { text } => {
            append(mirror, observer, HistoryEntry::Notice(text));
        }
        ServerMessage::Error {
            code: ErrorCode::RecipientNotFound,
            target,
            message,
        } => {
            let recipient = target.unwrap_or(message);
            observer.delivery_failed(&recipient);
        }
        ServerMessage::Error { code, message, .. } => {
            warn!("Relay error {:?}: {}", code, message);
            observer.relay_error(code, &message);
        }
        ServerMessage::Welcome { username, members } => {
            debug!("Welcome for {} with {} members", username, members.len());
            seed_members(mirror, observer, members);
        }
    }
}

/// Replace the member list with the relay's snapshot
pub(crate) fn seed_members(
    mirror: &SharedMirror,
    observer: &dyn SessionObserver,
    members: Vec<Username>,
) {
    let members = {
        let mut state = mirror.write();
        state.set_members(members);
        state.members().to_vec()
    };
    observer.members_changed(&members);
}

/// Append to history, then notify outside the lock
pub(crate) fn append(mirror: &SharedMirror, observer: &dyn SessionObserver, entry: HistoryEntry) {
    mirror.write().push_history(entry.clone());
    observer.history_appended(&entry);
}

/// Read lines until the stream ends, fails, or `closed` is cancelled
///
/// On exit the loop cancels `closed` so the writer stops too, then tells the
/// observer the connection is gone.
pub async fn reader_loop<R>(
    mut lines: FramedRead<R, LinesCodec>,
    mirror: SharedMirror,
    observer: Arc<dyn SessionObserver>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => {
                debug!("Reader stopping: connection closed locally");
                break;
            }
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                debug!("Read failed: {}", e);
                break;
            }
            None => {
                debug!("Relay closed the connection");
                break;
            }
        };

        match decode_line::<ServerMessage>(&line) {
            Ok(msg) => apply_message(&mirror, observer.as_ref(), msg),
            Err(e) => warn!("Skipping undecodable line from relay: {}", e),
        }
    }

    closed.cancel();
    observer.disconnected();
}
