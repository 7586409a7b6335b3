//! Participant lifecycle: join, rejoin, leave, preferences.
//!
//! A (room, user) pair has at most one row. Leaving marks the row `LEFT`
//! rather than deleting it; rows disappear only when their room is deleted,
//! which happens in the same transaction that takes the active count to zero.

use parlor_shared::types::{ParticipantStatus, RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{encode_ts, now, parse_ts, Departure, Participant, Transition};
use crate::rooms::room_by_id;

pub(crate) const PARTICIPANT_COLUMNS: &str = "room_id, user_id, status, last_read_message_id, \
     last_left_at, translate_enabled, notifications_enabled, joined_at";

impl Database {
    pub fn get_participant(&self, room: RoomId, user: UserId) -> Result<Participant> {
        find_participant(self.conn(), room, user)?
            .ok_or(StoreError::ParticipantNotFound { room, user })
    }

    pub fn find_participant(&self, room: RoomId, user: UserId) -> Result<Option<Participant>> {
        find_participant(self.conn(), room, user)
    }

    /// All participant rows of a room, in join order.
    pub fn list_participants(&self, room: RoomId) -> Result<Vec<Participant>> {
        self.participants_where(room, "")
    }

    pub fn active_participants(&self, room: RoomId) -> Result<Vec<Participant>> {
        self.participants_where(room, "AND status = 'ACTIVE'")
    }

    pub fn active_count(&self, room: RoomId) -> Result<u32> {
        active_count(self.conn(), room)
    }

    /// Join a group room, rejoining if the user had left.
    pub fn join_group(&mut self, room: RoomId, user: UserId) -> Result<Transition> {
        let tx = self.write_tx()?;

        if !room_by_id(&tx, room)?.is_group {
            return Err(StoreError::NotGroup(room));
        }

        let transition = match find_participant(&tx, room, user)? {
            Some(p) if p.is_active() => {
                return Err(StoreError::AlreadyParticipant { room, user });
            }
            Some(_) => {
                rejoin_participant(&tx, room, user)?;
                Transition::Rejoined { user_id: user }
            }
            None => {
                insert_participant(&tx, room, user)?;
                Transition::Created { user_id: user }
            }
        };

        tx.commit()?;

        tracing::debug!(room = %room, user = %user, ?transition, "joined group");
        Ok(transition)
    }

    /// Move `user` to `LEFT`.
    ///
    /// A group owner hands ownership to the longest-standing other active
    /// participant first. When nobody active remains the room is deleted
    /// together with its participants and messages. Leaving twice is a no-op.
    pub fn leave_room(&mut self, room: RoomId, user: UserId) -> Result<Departure> {
        let tx = self.write_tx()?;

        let room_row = room_by_id(&tx, room)?;
        let participant =
            find_participant(&tx, room, user)?.ok_or(StoreError::ParticipantNotFound { room, user })?;

        let mut departure = Departure::default();
        if !participant.is_active() {
            return Ok(departure);
        }

        if room_row.is_group && room_row.owner_id == Some(user) {
            let successor: Option<i64> = tx
                .query_row(
                    "SELECT user_id FROM participants
                     WHERE room_id = ?1 AND user_id != ?2 AND status = 'ACTIVE'
                     ORDER BY joined_at, user_id
                     LIMIT 1",
                    params![room.0, user.0],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(next) = successor {
                tx.execute(
                    "UPDATE rooms SET owner_id = ?1 WHERE id = ?2",
                    params![next, room.0],
                )?;
                departure.transitions.push(Transition::OwnershipTransferred {
                    from: user,
                    to: UserId(next),
                });
            }
        }

        tx.execute(
            "UPDATE participants SET status = 'LEFT', last_left_at = ?1
             WHERE room_id = ?2 AND user_id = ?3",
            params![encode_ts(&now()), room.0, user.0],
        )?;
        departure.transitions.push(Transition::Left { user_id: user });

        if active_count(&tx, room)? == 0 {
            tx.execute("DELETE FROM rooms WHERE id = ?1", params![room.0])?;
            departure.transitions.push(Transition::RoomDeleted);
            departure.room_deleted = true;
        }

        tx.commit()?;

        tracing::info!(
            room = %room,
            user = %user,
            deleted = departure.room_deleted,
            "participant left room"
        );
        Ok(departure)
    }

    pub fn set_translation(&self, room: RoomId, user: UserId, enabled: bool) -> Result<Participant> {
        self.set_flag(room, user, "translate_enabled", enabled)
    }

    pub fn set_notifications(
        &self,
        room: RoomId,
        user: UserId,
        enabled: bool,
    ) -> Result<Participant> {
        self.set_flag(room, user, "notifications_enabled", enabled)
    }

    fn set_flag(&self, room: RoomId, user: UserId, column: &str, enabled: bool) -> Result<Participant> {
        let affected = self.conn().execute(
            &format!("UPDATE participants SET {column} = ?1 WHERE room_id = ?2 AND user_id = ?3"),
            params![enabled, room.0, user.0],
        )?;
        if affected == 0 {
            return Err(StoreError::ParticipantNotFound { room, user });
        }
        self.get_participant(room, user)
    }

    fn participants_where(&self, room: RoomId, filter: &str) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE room_id = ?1 {filter}
             ORDER BY joined_at, user_id"
        ))?;

        let rows = stmt.query_map(params![room.0], participant_row)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }
}

pub(crate) fn find_participant(
    conn: &Connection,
    room: RoomId,
    user: UserId,
) -> Result<Option<Participant>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE room_id = ?1 AND user_id = ?2"),
            params![room.0, user.0],
            participant_row,
        )
        .optional()?)
}

pub(crate) fn insert_participant(conn: &Connection, room: RoomId, user: UserId) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (room_id, user_id, status, joined_at)
         VALUES (?1, ?2, 'ACTIVE', ?3)",
        params![room.0, user.0, encode_ts(&now())],
    )?;
    Ok(())
}

/// Flip a `LEFT` row back to `ACTIVE`. Returns whether anything changed.
pub(crate) fn rejoin_participant(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE participants SET status = 'ACTIVE', last_left_at = NULL
         WHERE room_id = ?1 AND user_id = ?2 AND status = 'LEFT'",
        params![room.0, user.0],
    )?;
    Ok(affected > 0)
}

pub(crate) fn active_count(conn: &Connection, room: RoomId) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM participants WHERE room_id = ?1 AND status = 'ACTIVE'",
        params![room.0],
        |row| row.get(0),
    )?)
}

pub(crate) fn participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let status_str: String = row.get(2)?;
    let status = ParticipantStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown participant status {status_str}").into(),
        )
    })?;

    let last_left_at = match row.get::<_, Option<String>>(4)? {
        Some(raw) => Some(parse_ts(4, &raw)?),
        None => None,
    };
    let joined_at: String = row.get(7)?;

    Ok(Participant {
        room_id: RoomId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        status,
        last_read_message_id: row
            .get::<_, Option<i64>>(3)?
            .map(parlor_shared::types::MessageId),
        last_left_at,
        translate_enabled: row.get(5)?,
        notifications_enabled: row.get(6)?,
        joined_at: parse_ts(7, &joined_at)?,
    })
}
