//! Read cursors and unread counts.
//!
//! Unread counts are never stored. They are derived from the cursor columns
//! at query time, so a recount inside the cursor transaction always reflects
//! the committed state of every other participant.

use parlor_shared::types::{MessageId, RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CursorUpdate, Transition};
use crate::participants::find_participant;

/// Per-message unread count: active participants minus the active
/// participants whose cursor already covers the message.
const UNREAD_FOR_MESSAGE: &str = "
    MAX(0,
        (SELECT COUNT(*) FROM participants p
         WHERE p.room_id = m.room_id AND p.status = 'ACTIVE')
      - (SELECT COUNT(*) FROM participants p
         WHERE p.room_id = m.room_id AND p.status = 'ACTIVE'
           AND COALESCE(p.last_read_message_id, 0) >= m.id))";

impl Database {
    /// Move `reader`'s cursor forward to `target`.
    ///
    /// `target` must be a message of `room`. A target at or behind the stored cursor changes nothing and yields no
    /// recounts. Otherwise the returned recounts cover every message in
    /// `(previous, target]` not sent by the reader.
    pub fn advance_read_cursor(
        &mut self,
        room: RoomId,
        reader: UserId,
        target: MessageId,
    ) -> Result<CursorUpdate> {
        let tx = self.write_tx()?;

        let me = find_participant(&tx, room, reader)?
            .ok_or(StoreError::ParticipantNotFound { room, user: reader })?;
        let previous = me.last_read_message_id;

        let in_room = tx
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?1 AND room_id = ?2",
                params![target.0, room.0],
                |_| Ok(()),
            )
            .optional()?;
        if in_room.is_none() {
            return Err(StoreError::MessageNotFound(target));
        }

        let Some(transition) = raise_cursor(&tx, room, reader, previous, target)? else {
            return Ok(CursorUpdate {
                previous,
                current: previous,
                transition: None,
                recounts: Vec::new(),
            });
        };

        let recounts = {
            let mut stmt = tx.prepare(&format!(
                "SELECT m.id, {UNREAD_FOR_MESSAGE}
                 FROM messages m
                 WHERE m.room_id = ?1 AND m.id > ?2 AND m.id <= ?3 AND m.sender_id != ?4
                 ORDER BY m.id"
            ))?;
            let rows = stmt.query_map(
                params![room.0, me.read_cursor(), target.0, reader.0],
                |row| Ok((MessageId(row.get(0)?), row.get::<_, u32>(1)?)),
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.commit()?;

        tracing::debug!(
            room = %room,
            reader = %reader,
            from = previous.map(|id| id.0).unwrap_or(0),
            to = %target,
            recounted = recounts.len(),
            "read cursor advanced"
        );
        Ok(CursorUpdate {
            previous,
            current: Some(target),
            transition: Some(transition),
            recounts,
        })
    }

    pub fn unread_count_for_message(&self, id: MessageId) -> Result<u32> {
        self.conn()
            .query_row(
                &format!("SELECT {UNREAD_FOR_MESSAGE} FROM messages m WHERE m.id = ?1"),
                params![id.0],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::MessageNotFound(id),
                other => StoreError::Sqlite(other),
            })
    }
}

/// Raise the stored cursor to `target` if it is ahead of `current`.
///
/// The `MAX` in the update keeps the cursor monotonic even if `current` is
/// stale.
pub(crate) fn raise_cursor(
    conn: &Connection,
    room: RoomId,
    user: UserId,
    current: Option<MessageId>,
    target: MessageId,
) -> Result<Option<Transition>> {
    if current.is_some_and(|c| c >= target) {
        return Ok(None);
    }

    conn.execute(
        "UPDATE participants
         SET last_read_message_id = MAX(COALESCE(last_read_message_id, 0), ?1)
         WHERE room_id = ?2 AND user_id = ?3",
        params![target.0, room.0, user.0],
    )?;

    Ok(Some(Transition::CursorAdvanced {
        user_id: user,
        from: current,
        to: target,
    }))
}
