//! Domain model structs persisted in the chat database.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parlor_shared::constants::MAX_TEXT_LENGTH;
use parlor_shared::types::{MessageId, MessageKind, ParticipantStatus, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A chat room, either a 1:1 conversation or a named group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub is_group: bool,
    /// Group display name. Always `None` for 1:1 rooms.
    pub name: Option<String>,
    pub description: Option<String>,
    /// Current group owner. The owner is always an active participant.
    pub owner_id: Option<UserId>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// Membership of one user in one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: ParticipantStatus,
    /// Read cursor. Never moves backwards.
    pub last_read_message_id: Option<MessageId>,
    /// Set when the participant leaves, cleared on rejoin.
    pub last_left_at: Option<DateTime<Utc>>,
    pub translate_enabled: bool,
    pub notifications_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.status == ParticipantStatus::Active
    }

    /// Lower bound (exclusive) on `sent_at` for messages this participant may
    /// see, or `None` when the whole history is visible.
    pub fn visible_after(&self) -> Option<DateTime<Utc>> {
        match self.status {
            ParticipantStatus::Left => self.last_left_at,
            ParticipantStatus::Active => None,
        }
    }

    /// Cursor value with "never read" mapped to zero.
    pub fn read_cursor(&self) -> i64 {
        self.last_read_message_id.map(|id| id.0).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Message text, or the object-storage key for media messages.
    pub content: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
}

/// Validated message body waiting to be stored.
///
/// Built through [`NewMessage::text`] or [`NewMessage::media`]; the two
/// constructors are the only way to pair content with a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    content: String,
    kind: MessageKind,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(StoreError::Validation("message text is empty".into()));
        }
        if content.len() > MAX_TEXT_LENGTH {
            return Err(StoreError::Validation(format!(
                "message text exceeds {MAX_TEXT_LENGTH} bytes"
            )));
        }
        Ok(Self {
            content,
            kind: MessageKind::Text,
        })
    }

    pub fn media(key: impl Into<String>, kind: MessageKind) -> Result<Self> {
        if !kind.is_media() {
            return Err(StoreError::TextAsMedia);
        }
        let key = key.into();
        if key.trim().is_empty() {
            return Err(StoreError::Validation("media key is empty".into()));
        }
        Ok(Self { content: key, kind })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A participant or room state change performed by a store operation.
///
/// Operations that move participants through their lifecycle return the
/// transitions they applied, so callers can log or react to implicit changes
/// such as a rejoin caused by sending a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Created { user_id: UserId },
    Rejoined { user_id: UserId },
    Left { user_id: UserId },
    OwnershipTransferred { from: UserId, to: UserId },
    RoomDeleted,
    CursorAdvanced {
        user_id: UserId,
        from: Option<MessageId>,
        to: MessageId,
    },
}

/// Result of storing a message through the send path.
#[derive(Debug, Clone)]
pub struct Posted {
    pub room: Room,
    pub message: Message,
    pub transitions: Vec<Transition>,
}

/// Result of a participant leaving a room.
#[derive(Debug, Clone, Default)]
pub struct Departure {
    pub transitions: Vec<Transition>,
    pub room_deleted: bool,
}

/// Result of moving a read cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdate {
    pub previous: Option<MessageId>,
    pub current: Option<MessageId>,
    pub transition: Option<Transition>,
    /// Recomputed unread counts for the messages the cursor moved over,
    /// ascending by id. Empty when the cursor did not move.
    pub recounts: Vec<(MessageId, u32)>,
}

/// A group room matched by a name search.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMatch {
    pub room: Room,
    pub participant_count: u32,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current time truncated to the precision stored in the database.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC-3339 so that string order in SQLite matches time order.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_constructor_rejects_text_kind() {
        let err = NewMessage::media("chats/1/a.png", MessageKind::Text).unwrap_err();
        assert!(matches!(err, StoreError::TextAsMedia));
        assert!(NewMessage::media("chats/1/a.png", MessageKind::Image).is_ok());
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(matches!(
            NewMessage::text("   "),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(NewMessage::text("hi").unwrap().kind(), MessageKind::Text);
    }

    #[test]
    fn timestamps_round_trip_and_sort_lexically() {
        let a = now();
        let encoded = encode_ts(&a);
        assert_eq!(parse_ts(0, &encoded).unwrap(), a);

        let later = a + chrono::Duration::milliseconds(5);
        assert!(encode_ts(&later) > encoded);
    }

    #[test]
    fn left_participant_sees_after_leave_time() {
        let left_at = now();
        let mut p = Participant {
            room_id: RoomId(1),
            user_id: UserId(1),
            status: ParticipantStatus::Left,
            last_read_message_id: None,
            last_left_at: Some(left_at),
            translate_enabled: false,
            notifications_enabled: true,
            joined_at: left_at,
        };
        assert_eq!(p.visible_after(), Some(left_at));
        assert_eq!(p.read_cursor(), 0);

        p.status = ParticipantStatus::Active;
        assert_eq!(p.visible_after(), None);
    }
}
