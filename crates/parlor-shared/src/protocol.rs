use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, MessageKind, RoomId, UserId};

/// Hub topic names, one logical channel per purpose.
pub mod topic {
    use crate::types::{RoomId, UserId};

    /// Per-recipient message stream for one room.
    pub fn room_messages(recipient: UserId, room: RoomId) -> String {
        format!("user:{recipient}:room:{room}:messages")
    }

    /// Per-recipient room list updates.
    pub fn room_list(recipient: UserId) -> String {
        format!("user:{recipient}:rooms")
    }

    /// Room-wide unread count batches.
    pub fn read_counts(room: RoomId) -> String {
        format!("room:{room}:read-counts")
    }

    /// Room-wide structural events (deletions, typing).
    pub fn room_events(room: RoomId) -> String {
        format!("room:{room}")
    }
}

/// One message as seen by one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Raw text, or the full media URL for image/video messages.
    pub origin_content: String,
    /// Translation into the recipient's language, when requested and available.
    pub target_content: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub sender_first_name: Option<String>,
    pub sender_last_name: Option<String>,
    pub sender_image_url: Option<String>,
    pub message_type: MessageKind,
}

/// The "room list" row for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub room_name: String,
    /// `None` when the room has no visible message yet.
    pub last_message_content: Option<String>,
    pub last_message_time: DateTime<Utc>,
    pub room_image_url: Option<String>,
    pub unread_count: u32,
    pub participant_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadCount {
    pub message_id: MessageId,
    pub unread_count: u32,
}

/// Batch published on [`topic::read_counts`] after a read cursor moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadCountBatch(pub Vec<ReadCount>);

/// Structural events published on [`topic::room_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoomEvent {
    Delete {
        id: MessageId,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Chat,
}

/// Event handed to the external notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub recipient_id: UserId,
    pub actor_id: UserId,
    pub kind: NotificationKind,
    pub reference_id: i64,
    pub sub_reference_id: Option<i64>,
    pub snippet: Option<String>,
}

impl NotificationEvent {
    pub fn chat(recipient: UserId, actor: UserId, room: RoomId, snippet: String) -> Self {
        Self {
            recipient_id: recipient,
            actor_id: actor,
            kind: NotificationKind::Chat,
            reference_id: room.0,
            sub_reference_id: None,
            snippet: Some(snippet),
        }
    }
}
