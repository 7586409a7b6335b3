//! v001 -- Initial schema creation.
//!
//! Creates the three chat tables: `rooms`, `participants` and `messages`.
//! Deleting a room cascades to its participants and messages.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms (1:1 and group)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    is_group    INTEGER NOT NULL,             -- boolean 0/1
    name        TEXT,                         -- group only
    description TEXT,                         -- group only
    owner_id    INTEGER,                      -- group only
    image_url   TEXT,                         -- group only
    created_at  TEXT NOT NULL                 -- RFC-3339, microseconds, UTC
);

CREATE INDEX IF NOT EXISTS idx_rooms_group_created ON rooms(is_group, created_at DESC);

-- ----------------------------------------------------------------
-- Participants: one row per (room, user), never duplicated
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    room_id               INTEGER NOT NULL,
    user_id               INTEGER NOT NULL,
    status                TEXT NOT NULL DEFAULT 'ACTIVE'
                          CHECK (status IN ('ACTIVE', 'LEFT')),
    last_read_message_id  INTEGER,
    last_left_at          TEXT,
    translate_enabled     INTEGER NOT NULL DEFAULT 0,
    notifications_enabled INTEGER NOT NULL DEFAULT 1,
    joined_at             TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id, status);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused
    room_id      INTEGER NOT NULL,
    sender_id    INTEGER NOT NULL,
    content      TEXT NOT NULL,                      -- text or media storage key
    message_type TEXT NOT NULL CHECK (message_type IN ('TEXT', 'IMAGE', 'VIDEO')),
    sent_at      TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_id ON messages(room_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_messages_room_sent ON messages(room_id, sent_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
