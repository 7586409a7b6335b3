use parlor_shared::error::ErrorCode;
use parlor_shared::types::{MessageId, RoomId, UserId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chat room {0} not found")]
    RoomNotFound(RoomId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error("User {user} is not a participant of room {room}")]
    ParticipantNotFound { room: RoomId, user: UserId },

    #[error("User {user} already participates in room {room}")]
    AlreadyParticipant { room: RoomId, user: UserId },

    #[error("Room {0} is not a group room")]
    NotGroup(RoomId),

    /// A media message was constructed with the TEXT type.
    #[error("Media messages cannot use the TEXT type")]
    TextAsMedia,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound(_) | Self::MessageNotFound(_) | Self::ParticipantNotFound { .. } => {
                ErrorCode::NotFound
            }
            Self::AlreadyParticipant { .. } | Self::NotGroup(_) | Self::TextAsMedia => {
                ErrorCode::Conflict
            }
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Sqlite(_) | Self::NoDataDir | Self::Io(_) | Self::Migration(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
