use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Message, MessageKind, UserStatus};

/// A frame received from a client over the duplex connection. The `type`
/// field is the discriminator; unknown types fail to parse and are dropped by
/// the session, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Produce a chat message. Room and author come from the session, the id
    /// and commit timestamp from the durable store.
    Message {
        content: String,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<i64>,
    },
    TypingStart,
    TypingStop,
    Read {
        message_id: i64,
    },
    /// Full message envelope, re-broadcast as-is; durable persistence is done
    /// by the REST path.
    MessageEdited {
        #[serde(flatten)]
        message: Message,
    },
    MessageDeleted {
        #[serde(flatten)]
        message: Message,
    },
    ReactionAdded {
        message_id: i64,
        user_id: Uuid,
        emoji: String,
    },
    ReactionRemoved {
        message_id: i64,
        user_id: Uuid,
        emoji: String,
    },
}

/// A frame fanned out to clients by a room. Serialized as JSON text with the
/// `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A durably committed message, redelivered through the sync bus.
    MessageDelivered {
        message_id: i64,
        room_id: Uuid,
        user_id: Uuid,
        content: String,
        timestamp: DateTime<Utc>,
    },
    MessageEdited {
        #[serde(flatten)]
        message: Message,
    },
    MessageDeleted {
        #[serde(flatten)]
        message: Message,
    },
    TypingUpdate {
        room_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    Join {
        room_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Leave {
        room_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    StatusChange {
        user_id: Uuid,
        status: UserStatus,
        timestamp: DateTime<Utc>,
    },
    ReactionAdded {
        message_id: i64,
        user_id: Uuid,
        emoji: String,
    },
    ReactionRemoved {
        message_id: i64,
        user_id: Uuid,
        emoji: String,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn message_frame_defaults_to_text() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        match frame {
            ClientFrame::Message { content, message_type, file_url, parent_id } => {
                assert_eq!(content, "hi");
                assert_eq!(message_type, MessageKind::Text);
                assert!(file_url.is_none());
                assert!(parent_id.is_none());
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"shrug"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn read_requires_numeric_message_id() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"read"}"#).is_err());
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"read","message_id":42}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Read { message_id: 42 }));
    }

    #[test]
    fn server_frame_carries_discriminator() {
        let frame = ServerFrame::TypingUpdate {
            room_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            is_typing: true,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "typing_update");
        assert_eq!(json["is_typing"], true);
    }
}
