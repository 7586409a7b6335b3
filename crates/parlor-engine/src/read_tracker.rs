use serde::Serialize;

use parlor_shared::protocol::{topic, ReadCount, ReadCountBatch};
use parlor_shared::types::{MessageId, RoomId, UserId};
use parlor_store::CursorUpdate;

use crate::error::Result;
use crate::hub::EventHub;
use crate::pool::DbPool;
use crate::summary::RoomSummaryBuilder;

/// Outcome of a mark-read request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// The stored cursor after the call.
    pub last_read_message_id: Option<MessageId>,
    /// Whether the cursor moved.
    pub advanced: bool,
}

/// Moves read cursors and broadcasts the resulting unread counts.
#[derive(Clone)]
pub struct ReadTracker {
    pool: DbPool,
    hub: EventHub,
    summaries: RoomSummaryBuilder,
}

impl ReadTracker {
    pub fn new(pool: DbPool, hub: EventHub, summaries: RoomSummaryBuilder) -> Self {
        Self {
            pool,
            hub,
            summaries,
        }
    }

    /// Advance `reader`'s cursor in `room` to `up_to`.
    ///
    /// Publishes one batch of recomputed unread counts on the room's
    /// read-count channel (empty when the cursor did not move) and refreshes
    /// the reader's room summary.
    pub async fn mark_read(&self, room: RoomId, reader: UserId, up_to: MessageId) -> Result<ReadReceipt> {
        let update = self
            .pool
            .run(move |db| db.advance_read_cursor(room, reader, up_to))
            .await?;

        self.broadcast(room, reader, &update).await;

        Ok(ReadReceipt {
            room_id: room,
            user_id: reader,
            last_read_message_id: update.current,
            advanced: update.transition.is_some(),
        })
    }

    /// Mark everything currently in `room` as read.
    pub async fn mark_all_read(&self, room: RoomId, reader: UserId) -> Result<ReadReceipt> {
        let (newest, current) = self
            .pool
            .run(move |db| {
                let me = db.get_participant(room, reader)?;
                Ok((db.newest_message_id(room)?, me.last_read_message_id))
            })
            .await?;

        match newest {
            Some(id) => self.mark_read(room, reader, id).await,
            None => {
                tracing::info!(room = %room, reader = %reader, "mark-all-read on empty room");
                Ok(ReadReceipt {
                    room_id: room,
                    user_id: reader,
                    last_read_message_id: current,
                    advanced: false,
                })
            }
        }
    }

    async fn broadcast(&self, room: RoomId, reader: UserId, update: &CursorUpdate) {
        let batch = ReadCountBatch(
            update
                .recounts
                .iter()
                .map(|&(message_id, unread_count)| ReadCount {
                    message_id,
                    unread_count,
                })
                .collect(),
        );
        self.hub.publish(&topic::read_counts(room), &batch).await;

        let summaries = self.summaries.clone();
        let hub = self.hub.clone();
        tokio::spawn(async move {
            match summaries.build(room, reader).await {
                Ok(summary) => {
                    hub.publish(&topic::room_list(reader), &summary).await;
                }
                Err(e) => {
                    tracing::warn!(room = %room, reader = %reader, error = %e, "summary refresh failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::collaborators::{MemoryBlockList, MemoryDirectory};
    use parlor_shared::protocol::RoomSummary;
    use parlor_store::NewMessage;
    use tokio::sync::broadcast::Receiver;

    fn tracker() -> (ReadTracker, DbPool, EventHub, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::open(&dir.path().join("reads.db"), 2).unwrap();
        let hub = EventHub::new();
        let summaries = RoomSummaryBuilder::new(
            pool.clone(),
            Arc::new(MemoryBlockList::new()),
            Arc::new(MemoryDirectory::new()),
        );
        (ReadTracker::new(pool.clone(), hub.clone(), summaries), pool, hub, dir)
    }

    async fn next(rx: &mut Receiver<serde_json::Value>) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn marking_read_broadcasts_counts_for_others_messages() {
        let (tracker, pool, hub, _dir) = tracker();
        let (u1, u2) = (UserId(1), UserId(2));
        let (room, m1, m3) = pool
            .run(move |db| {
                let (room, _) = db.create_one_to_one(u1, u2)?;
                let m1 = db.append_message(room.id, u1, NewMessage::text("m1")?)?;
                db.append_message(room.id, u2, NewMessage::text("m2")?)?;
                let m3 = db.append_message(room.id, u1, NewMessage::text("m3")?)?;
                db.advance_read_cursor(room.id, u1, m3.id)?;
                Ok((room.id, m1.id, m3.id))
            })
            .await
            .unwrap();

        let mut counts = hub.subscribe(&topic::read_counts(room)).await;
        let mut rooms = hub.subscribe(&topic::room_list(u2)).await;

        let receipt = tracker.mark_read(room, u2, m3).await.unwrap();
        assert!(receipt.advanced);
        assert_eq!(receipt.last_read_message_id, Some(m3));

        let batch: ReadCountBatch = serde_json::from_value(next(&mut counts).await).unwrap();
        assert_eq!(
            batch.0,
            vec![
                ReadCount {
                    message_id: m1,
                    unread_count: 0
                },
                ReadCount {
                    message_id: m3,
                    unread_count: 0
                },
            ]
        );

        let summary: RoomSummary = serde_json::from_value(next(&mut rooms).await).unwrap();
        assert_eq!(summary.room_id, room);
        assert_eq!(summary.unread_count, 0);
    }

    #[tokio::test]
    async fn mark_all_read_twice_is_stable() {
        let (tracker, pool, hub, _dir) = tracker();
        let room = pool
            .run(|db| {
                let (room, _) = db.create_one_to_one(UserId(1), UserId(2))?;
                db.post_message(room.id, UserId(1), NewMessage::text("a")?)?;
                db.post_message(room.id, UserId(1), NewMessage::text("b")?)?;
                Ok(room.id)
            })
            .await
            .unwrap();
        let mut counts = hub.subscribe(&topic::read_counts(room)).await;

        let first = tracker.mark_all_read(room, UserId(2)).await.unwrap();
        let batch: ReadCountBatch = serde_json::from_value(next(&mut counts).await).unwrap();
        assert_eq!(batch.0.len(), 2);

        let second = tracker.mark_all_read(room, UserId(2)).await.unwrap();
        assert_eq!(second.last_read_message_id, first.last_read_message_id);
        assert!(!second.advanced);
        let batch: ReadCountBatch = serde_json::from_value(next(&mut counts).await).unwrap();
        assert!(batch.0.is_empty());
    }

    #[tokio::test]
    async fn stale_cursor_keeps_stored_value() {
        let (tracker, pool, _hub, _dir) = tracker();
        let (room, ids) = pool
            .run(|db| {
                let (room, _) = db.create_one_to_one(UserId(1), UserId(2))?;
                let mut ids = Vec::new();
                for text in ["x", "y", "z"] {
                    ids.push(db.append_message(room.id, UserId(1), NewMessage::text(text)?)?.id);
                }
                Ok((room.id, ids))
            })
            .await
            .unwrap();

        tracker.mark_read(room, UserId(2), ids[2]).await.unwrap();
        let receipt = tracker.mark_read(room, UserId(2), ids[0]).await.unwrap();
        assert_eq!(receipt.last_read_message_id, Some(ids[2]));
        assert!(!receipt.advanced);
    }

    #[tokio::test]
    async fn empty_room_is_a_noop() {
        let (tracker, pool, _hub, _dir) = tracker();
        let room = pool
            .run(|db| db.create_group(UserId(1), "silent", None, None))
            .await
            .unwrap();
        let receipt = tracker.mark_all_read(room.id, UserId(1)).await.unwrap();
        assert_eq!(receipt.last_read_message_id, None);
        assert!(!receipt.advanced);
    }
}
