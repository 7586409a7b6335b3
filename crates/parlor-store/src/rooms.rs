use parlor_shared::constants::MAX_ROOM_NAME_LENGTH;
use parlor_shared::types::{RoomId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{encode_ts, now, parse_ts, GroupMatch, Room, Transition};
use crate::participants::{insert_participant, rejoin_participant};

const ROOM_COLUMNS: &str = "id, is_group, name, description, owner_id, image_url, created_at";

impl Database {
    /// Find or create the 1:1 room between `requester` and `peer`.
    ///
    /// An existing room is returned as is, except that a requester who had
    /// left it is rejoined. The peer's row is never touched here.
    pub fn create_one_to_one(
        &mut self,
        requester: UserId,
        peer: UserId,
    ) -> Result<(Room, Vec<Transition>)> {
        if requester == peer {
            return Err(StoreError::Validation(
                "cannot open a conversation with yourself".into(),
            ));
        }

        let tx = self.write_tx()?;
        let mut transitions = Vec::new();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT r.id FROM rooms r
                 JOIN participants a ON a.room_id = r.id AND a.user_id = ?1
                 JOIN participants b ON b.room_id = r.id AND b.user_id = ?2
                 WHERE r.is_group = 0
                 ORDER BY r.id
                 LIMIT 1",
                params![requester.0, peer.0],
                |row| row.get(0),
            )
            .optional()?;

        let room_id = match existing {
            Some(id) => {
                let room_id = RoomId(id);
                if rejoin_participant(&tx, room_id, requester)? {
                    transitions.push(Transition::Rejoined { user_id: requester });
                }
                room_id
            }
            None => {
                let created_at = encode_ts(&now());
                tx.execute(
                    "INSERT INTO rooms (is_group, created_at) VALUES (0, ?1)",
                    params![created_at],
                )?;
                let room_id = RoomId(tx.last_insert_rowid());
                for user in [requester, peer] {
                    insert_participant(&tx, room_id, user)?;
                    transitions.push(Transition::Created { user_id: user });
                }
                room_id
            }
        };

        let room = room_by_id(&tx, room_id)?;
        tx.commit()?;

        tracing::debug!(room = %room.id, requester = %requester, peer = %peer, ?transitions, "1:1 room ready");
        Ok((room, transitions))
    }

    /// Create a group room owned (and joined) by `owner`.
    pub fn create_group(
        &mut self,
        owner: UserId,
        name: &str,
        description: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("group name is empty".into()));
        }
        if name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(StoreError::Validation(format!(
                "group name exceeds {MAX_ROOM_NAME_LENGTH} characters"
            )));
        }

        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO rooms (is_group, name, description, owner_id, image_url, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![name, description, owner.0, image_url, encode_ts(&now())],
        )?;
        let room_id = RoomId(tx.last_insert_rowid());
        insert_participant(&tx, room_id, owner)?;
        let room = room_by_id(&tx, room_id)?;
        tx.commit()?;

        tracing::info!(room = %room.id, owner = %owner, "group created");
        Ok(room)
    }

    pub fn get_room(&self, id: RoomId) -> Result<Room> {
        room_by_id(self.conn(), id)
    }

    pub fn is_group(&self, id: RoomId) -> Result<bool> {
        self.conn()
            .query_row(
                "SELECT is_group FROM rooms WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::RoomNotFound(id))
    }

    /// Rooms in which `user` is an active participant, oldest first.
    pub fn list_rooms_for_user(&self, user: UserId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.is_group, r.name, r.description, r.owner_id, r.image_url, r.created_at
             FROM rooms r
             JOIN participants p ON p.room_id = r.id
             WHERE p.user_id = ?1 AND p.status = 'ACTIVE'
             ORDER BY r.id",
        )?;

        let rows = stmt.query_map(params![user.0], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    /// Case-insensitive substring search over group names, newest group first.
    pub fn search_group_rooms(&self, keyword: &str) -> Result<Vec<GroupMatch>> {
        self.group_matches(
            "contains_folded(r.name, ?1) ORDER BY r.created_at DESC, r.id DESC",
            params![keyword.trim()],
        )
    }

    /// Most recently created groups, paged by id.
    pub fn latest_group_rooms(&self, before: Option<RoomId>, limit: u32) -> Result<Vec<GroupMatch>> {
        self.group_matches(
            "(?1 IS NULL OR r.id < ?1) ORDER BY r.created_at DESC, r.id DESC LIMIT ?2",
            params![before.map(|id| id.0), limit],
        )
    }

    /// Groups with the most active participants.
    pub fn popular_group_rooms(&self, limit: u32) -> Result<Vec<GroupMatch>> {
        self.group_matches(
            "1 = 1 ORDER BY active_count DESC, r.id DESC LIMIT ?1",
            params![limit],
        )
    }

    fn group_matches(&self, tail: &str, values: &[&dyn rusqlite::ToSql]) -> Result<Vec<GroupMatch>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT r.id, r.is_group, r.name, r.description, r.owner_id, r.image_url, r.created_at,
                    (SELECT COUNT(*) FROM participants p
                     WHERE p.room_id = r.id AND p.status = 'ACTIVE') AS active_count
             FROM rooms r
             WHERE r.is_group = 1 AND {tail}"
        ))?;

        let rows = stmt.query_map(values, |row| {
            Ok(GroupMatch {
                room: row_to_room(row)?,
                participant_count: row.get(7)?,
            })
        })?;

        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        Ok(matches)
    }

    /// The other participant of a 1:1 room, regardless of status.
    pub fn peer_of(&self, room: RoomId, user: UserId) -> Result<Option<UserId>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT user_id FROM participants WHERE room_id = ?1 AND user_id != ?2
                 ORDER BY joined_at LIMIT 1",
                params![room.0, user.0],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(UserId))
    }
}

pub(crate) fn room_by_id(conn: &Connection, id: RoomId) -> Result<Room> {
    conn.query_row(
        &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
        params![id.0],
        row_to_room,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::RoomNotFound(id),
        other => StoreError::Sqlite(other),
    })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let created_at: String = row.get(6)?;
    Ok(Room {
        id: RoomId(row.get(0)?),
        is_group: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get::<_, Option<i64>>(4)?.map(UserId),
        image_url: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
    })
}
