//! Message protocol definitions
//!
//! Line-delimited JSON protocol. Every line is one object whose `"type"` field
//! names the message kind, so user text is never inspected to decide what a
//! line means. Both ends frame lines with [`line_codec`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LinesCodec;

use crate::error::AppError;
use crate::types::Username;

/// Longest accepted protocol line, in bytes (without the terminator)
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Build the line codec used on both ends of a connection
pub fn line_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_LINE_BYTES)
}

/// Encode one message as a protocol line (no trailing newline)
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Decode one protocol line
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line)
}

/// Client → Server message
///
/// All messages from peer to relay. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a username (must be the first message on a connection)
    ///
    /// Kept as a plain string on the wire so the relay can answer a bad
    /// name with `invalid_username` instead of a decode failure.
    Join { username: String },
    /// Send a chat line to everyone else in the room
    Chat { text: String },
    /// Send a private message to one user
    Direct { recipient: String, text: String },
    /// Leave the room and close the connection
    Logout,
}

/// Server → Client message
///
/// All messages from relay to peer. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted, username bound
    ///
    /// `members` lists every bound username in join order, the new one
    /// included, so the whole seed takes one queue slot.
    Welcome {
        username: Username,
        members: Vec<Username>,
    },
    /// A user is present in the room
    MemberJoined { username: Username },
    /// A user has left the room
    MemberLeft { username: Username },
    /// Chat line from another user
    Chat { from: Username, text: String },
    /// Private message
    Direct {
        from: Username,
        to: Username,
        text: String,
    },
    /// Human-readable room notice (arrivals, departures)
    Notice { text: String },
    /// Error occurred
    Error {
        code: ErrorCode,
        message: String,
        /// Username the error refers to, when there is one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Username already bound to another connection
    UsernameTaken,
    /// Username failed validation
    InvalidUsername,
    /// Chat or direct message before join
    NotJoined,
    /// Join sent twice on one connection
    AlreadyJoined,
    /// Direct message recipient is not connected
    RecipientNotFound,
    /// Direct message recipient is connected but its queue is full
    RecipientBusy,
    /// Invalid message format
    InvalidMessage,
}

impl ServerMessage {
    /// Arrival banner shown in room history
    pub fn arrival_notice(username: &Username) -> Self {
        ServerMessage::Notice {
            text: format!("{} has entered the chatroom", username),
        }
    }

    /// Departure banner shown in room history
    pub fn departure_notice(username: &Username) -> Self {
        ServerMessage::Notice {
            text: format!("{} has left the chatroom", username),
        }
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message, target) = match &err {
            AppError::UsernameTaken(name) => (
                ErrorCode::UsernameTaken,
                format!("Username '{}' is already taken", name),
                Some(name.clone()),
            ),
            AppError::InvalidUsername(reason) => {
                (ErrorCode::InvalidUsername, format!("Invalid username: {}", reason), None)
            }
            AppError::NotJoined => {
                (ErrorCode::NotJoined, "Join the room first".to_string(), None)
            }
            AppError::AlreadyJoined => {
                (ErrorCode::AlreadyJoined, "You have already joined".to_string(), None)
            }
            AppError::RecipientNotFound(name) => (
                ErrorCode::RecipientNotFound,
                format!("User '{}' is not connected", name),
                Some(name.clone()),
            ),
            AppError::RecipientBusy(name) => (
                ErrorCode::RecipientBusy,
                format!("User '{}' is not accepting messages right now", name),
                Some(name.clone()),
            ),
            AppError::Json(e) => (
                ErrorCode::InvalidMessage,
                format!("Invalid message format: {}", e),
                None,
            ),
            AppError::Codec(e) => (
                ErrorCode::InvalidMessage,
                format!("Invalid line: {}", e),
                None,
            ),
            // Fatal errors are not typically converted (connection closes)
            _ => (ErrorCode::InvalidMessage, "Internal error".to_string(), None),
        };
        ServerMessage::Error {
            code,
            message,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "join", "username": "alice"}"#;
        let msg: ClientMessage = decode_line(json).unwrap();
        match msg {
            ClientMessage::Join { username } => assert_eq!(username, "alice"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_logout_is_unit_variant() {
        let line = encode_line(&ClientMessage::Logout).unwrap();
        assert_eq!(line, r#"{"type":"logout"}"#);
    }

    #[test]
    fn test_welcome_with_empty_username_rejected() {
        let json = r#"{"type": "welcome", "username": "", "members": []}"#;
        assert!(decode_line::<ServerMessage>(json).is_err());
    }

    #[test]
    fn test_welcome_carries_members_in_order() {
        let json = r#"{"type":"welcome","username":"carol","members":["alice","bob","carol"]}"#;
        match decode_line::<ServerMessage>(json).unwrap() {
            ServerMessage::Welcome { username, members } => {
                assert_eq!(username, "carol");
                let names: Vec<&str> = members.iter().map(Username::as_str).collect();
                assert_eq!(names, vec!["alice", "bob", "carol"]);
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_serialize() {
        let msg = ServerMessage::Chat {
            from: Username::parse("alice").unwrap(),
            text: "hello".to_string(),
        };
        let json = encode_line(&msg).unwrap();
        assert!(json.contains("\"type\":\"chat\""));
        assert!(json.contains("\"from\":\"alice\""));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_sentinel_characters_stay_in_text() {
        // Text that a substring-sniffing decoder would misclassify
        let text = "@everyone ~ see a&b&c, note: this";
        let line = encode_line(&ClientMessage::Chat {
            text: text.to_string(),
        })
        .unwrap();

        match decode_line::<ClientMessage>(&line).unwrap() {
            ClientMessage::Chat { text: decoded } => assert_eq!(decoded, text),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_newline_in_text_is_escaped() {
        let line = encode_line(&ClientMessage::Chat {
            text: "two\nlines".to_string(),
        })
        .unwrap();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(decode_line::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
        assert!(decode_line::<ClientMessage>("alice: hello").is_err());
    }

    #[test]
    fn test_error_code_serialize() {
        let msg: ServerMessage = AppError::RecipientNotFound("bob".to_string()).into();
        let json = encode_line(&msg).unwrap();
        assert!(json.contains("\"code\":\"recipient_not_found\""));
        assert!(json.contains("\"target\":\"bob\""));
    }

    #[test]
    fn test_busy_recipient_has_own_code() {
        let msg: ServerMessage = AppError::RecipientBusy("bob".to_string()).into();
        match msg {
            ServerMessage::Error {
                code,
                message,
                target,
            } => {
                assert_eq!(code, ErrorCode::RecipientBusy);
                assert!(!message.contains("not connected"));
                assert_eq!(target.as_deref(), Some("bob"));
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_error_without_target_omits_field() {
        let msg: ServerMessage = AppError::NotJoined.into();
        let json = encode_line(&msg).unwrap();
        assert!(!json.contains("target"));

        let back: ServerMessage = decode_line(&json).unwrap();
        assert_eq!(back, msg);
    }
}
