use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::UserStatus;

/// Logical channel names on the sync bus.
pub const CHANNEL_MESSAGES: &str = "messages";
pub const CHANNEL_MESSAGES_DELIVERED: &str = "messages_delivered";
pub const CHANNEL_ROOM_EVENTS: &str = "room_events";
pub const CHANNEL_USER_EVENTS: &str = "user_events";

/// Envelope stored in the bus table. The payload is opaque to the transport;
/// consumers decode it according to the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub channel: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Payload on `messages_delivered`, published by the write pipeline after a
/// batch commits. Receivers order by message id when they need per-room order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelivered {
    pub message_id: i64,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload on `room_events`: reaction updates and typing fan-out. Duplicates
/// are acceptable as UI state refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    ReactionAdded {
        room_id: Uuid,
        message_id: i64,
        user_id: Uuid,
        emoji: String,
        timestamp: DateTime<Utc>,
    },
    ReactionRemoved {
        room_id: Uuid,
        message_id: i64,
        user_id: Uuid,
        emoji: String,
        timestamp: DateTime<Utc>,
    },
    TypingUpdate {
        room_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
}

impl RoomEvent {
    pub fn room_id(&self) -> Uuid {
        match self {
            RoomEvent::ReactionAdded { room_id, .. }
            | RoomEvent::ReactionRemoved { room_id, .. }
            | RoomEvent::TypingUpdate { room_id, .. } => *room_id,
        }
    }
}

/// Payload on `user_events`, published by the session lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    StatusChange {
        user_id: Uuid,
        status: UserStatus,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<Uuid>,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn room_event_discriminator_matches_wire_names() {
        let event = RoomEvent::ReactionAdded {
            room_id: Uuid::new_v4(),
            message_id: 7,
            user_id: Uuid::new_v4(),
            emoji: "👍".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reaction_added");
    }

    #[test]
    fn status_change_omits_absent_room() {
        let event = UserEvent::StatusChange {
            user_id: Uuid::new_v4(),
            status: UserStatus::Offline,
            timestamp: Utc::now(),
            room_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert!(json.get("room_id").is_none());
    }
}
