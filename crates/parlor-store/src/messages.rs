use chrono::{DateTime, Utc};
use parlor_shared::types::{MessageId, MessageKind, RoomId, UserId};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{encode_ts, now, parse_ts, Message, NewMessage, Posted, Transition};
use crate::participants::{find_participant, rejoin_participant};
use crate::reads::raise_cursor;
use crate::rooms::room_by_id;

const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, content, message_type, sent_at";

impl Database {
    /// Store a message without touching any participant state.
    pub fn append_message(
        &mut self,
        room: RoomId,
        sender: UserId,
        body: NewMessage,
    ) -> Result<Message> {
        let tx = self.write_tx()?;
        room_by_id(&tx, room)?;
        let message = insert_message(&tx, room, sender, &body)?;
        tx.commit()?;
        Ok(message)
    }

    /// Store a message through the send path.
    ///
    /// In one transaction: the message is appended, a `LEFT` sender of a 1:1
    /// room is rejoined, a `LEFT` 1:1 peer is rejoined, and the sender's read
    /// cursor moves to the new message. A `LEFT` group member cannot send.
    pub fn post_message(&mut self, room: RoomId, sender: UserId, body: NewMessage) -> Result<Posted> {
        let tx = self.write_tx()?;

        let room_row = room_by_id(&tx, room)?;
        let me = find_participant(&tx, room, sender)?.ok_or_else(|| {
            StoreError::Forbidden(format!("user {sender} is not a participant of room {room}"))
        })?;

        let mut transitions = Vec::new();
        if !me.is_active() {
            if room_row.is_group {
                return Err(StoreError::Forbidden(format!(
                    "user {sender} has left group {room}"
                )));
            }
            rejoin_participant(&tx, room, sender)?;
            transitions.push(Transition::Rejoined { user_id: sender });
        }

        let message = insert_message(&tx, room, sender, &body)?;

        if !room_row.is_group {
            let peers: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT user_id FROM participants
                     WHERE room_id = ?1 AND user_id != ?2 AND status = 'LEFT'",
                )?;
                let rows = stmt.query_map(params![room.0, sender.0], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for peer in peers {
                rejoin_participant(&tx, room, UserId(peer))?;
                transitions.push(Transition::Rejoined {
                    user_id: UserId(peer),
                });
            }
        }

        if let Some(t) = raise_cursor(&tx, room, sender, me.last_read_message_id, message.id)? {
            transitions.push(t);
        }

        tx.commit()?;

        tracing::debug!(
            room = %room,
            sender = %sender,
            message = %message.id,
            kind = message.kind.as_str(),
            ?transitions,
            "message stored"
        );
        Ok(Posted {
            room: room_row,
            message,
            transitions,
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::MessageNotFound(id),
                other => StoreError::Sqlite(other),
            })
    }

    /// Newest-first page of messages older than `before` (or the newest page
    /// when `before` is `None`), restricted to `sent_at > visible_after`.
    pub fn page_before(
        &self,
        room: RoomId,
        before: Option<MessageId>,
        limit: u32,
        visible_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE room_id = ?1
               AND (?2 IS NULL OR id < ?2)
               AND (?3 IS NULL OR sent_at > ?3)
             ORDER BY id DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![
                room.0,
                before.map(|id| id.0),
                visible_after.as_ref().map(encode_ts),
                limit
            ],
            row_to_message,
        )?;
        collect(rows)
    }

    /// A page as seen by `viewer`, applying their visibility window.
    pub fn messages_for(
        &self,
        room: RoomId,
        viewer: UserId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        room_by_id(self.conn(), room)?;
        let visible_after = find_participant(self.conn(), room, viewer)?
            .and_then(|p| p.visible_after());
        self.page_before(room, before, limit, visible_after)
    }

    /// Up to `window` older messages, the target, and up to `window` newer
    /// messages, ascending by id.
    pub fn messages_around(
        &self,
        room: RoomId,
        target: MessageId,
        window: u32,
    ) -> Result<Vec<Message>> {
        let centre = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND room_id = ?2"),
                params![target.0, room.0],
                row_to_message,
            )
            .optional()?
            .ok_or(StoreError::MessageNotFound(target))?;

        let mut older = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE room_id = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![room.0, target.0, window], row_to_message)?;
            collect(rows)?
        };
        older.reverse();

        let newer = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE room_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![room.0, target.0, window], row_to_message)?;
            collect(rows)?
        };

        let mut out = older;
        out.push(centre);
        out.extend(newer);
        Ok(out)
    }

    /// Case-insensitive substring search over raw text content, newest first.
    /// Case folding is Unicode-aware, matching the translated search path.
    /// Media messages never match: their content is a storage key.
    pub fn search_messages(
        &self,
        room: RoomId,
        keyword: &str,
        visible_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE room_id = ?1
               AND message_type = 'TEXT'
               AND contains_folded(content, ?2)
               AND (?3 IS NULL OR sent_at > ?3)
             ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(
            params![
                room.0,
                keyword,
                visible_after.as_ref().map(encode_ts)
            ],
            row_to_message,
        )?;
        collect(rows)
    }

    /// Every visible text message of a room, newest first.
    pub fn all_text_messages(
        &self,
        room: RoomId,
        visible_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE room_id = ?1
               AND message_type = 'TEXT'
               AND (?2 IS NULL OR sent_at > ?2)
             ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(
            params![room.0, visible_after.as_ref().map(encode_ts)],
            row_to_message,
        )?;
        collect(rows)
    }

    /// Hard-delete a message authored by `requester`.
    ///
    /// Returns `None` when the message no longer exists.
    pub fn delete_message(
        &mut self,
        id: MessageId,
        requester: UserId,
    ) -> Result<Option<Message>> {
        let tx = self.write_tx()?;

        let Some(message) = tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .optional()?
        else {
            return Ok(None);
        };

        if message.sender_id != requester {
            return Err(StoreError::Forbidden(format!(
                "message {id} was not sent by user {requester}"
            )));
        }

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.0])?;
        tx.commit()?;

        tracing::debug!(room = %message.room_id, message = %id, "message deleted");
        Ok(Some(message))
    }

    pub fn latest_message(&self, room: RoomId) -> Result<Option<Message>> {
        self.latest_message_excluding(room, &[])
    }

    /// Newest message not sent by any of `excluded`.
    pub fn latest_message_excluding(
        &self,
        room: RoomId,
        excluded: &[UserId],
    ) -> Result<Option<Message>> {
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ?1");
        if !excluded.is_empty() {
            let placeholders = (0..excluded.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND sender_id NOT IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY id DESC LIMIT 1");

        let values = std::iter::once(room.0).chain(excluded.iter().map(|u| u.0));
        Ok(self
            .conn()
            .query_row(&sql, params_from_iter(values), row_to_message)
            .optional()?)
    }

    pub fn newest_message_id(&self, room: RoomId) -> Result<Option<MessageId>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT MAX(id) FROM messages WHERE room_id = ?1",
                params![room.0],
                |row| row.get::<_, Option<i64>>(0),
            )?
            .map(MessageId))
    }
}

fn insert_message(
    conn: &Connection,
    room: RoomId,
    sender: UserId,
    body: &NewMessage,
) -> Result<Message> {
    let sent_at = now();
    conn.execute(
        "INSERT INTO messages (room_id, sender_id, content, message_type, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            room.0,
            sender.0,
            body.content(),
            body.kind().as_str(),
            encode_ts(&sent_at)
        ],
    )?;

    Ok(Message {
        id: MessageId(conn.last_insert_rowid()),
        room_id: room,
        sender_id: sender,
        content: body.content().to_owned(),
        kind: body.kind(),
        sent_at,
    })
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<Message>>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(4)?;
    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message type {kind_str}").into(),
        )
    })?;
    let sent_at: String = row.get(5)?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        room_id: RoomId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        content: row.get(3)?,
        kind,
        sent_at: parse_ts(5, &sent_at)?,
    })
}
