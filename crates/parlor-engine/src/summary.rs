//! Room list rows, built per (room, user).
//!
//! The room-list query and the fan-out push both go through
//! [`RoomSummaryBuilder::build`], so a summary looks the same whichever path
//! produced it.

use std::sync::Arc;

use futures::future::try_join_all;

use parlor_shared::constants::UNKNOWN_USER_NAME;
use parlor_shared::protocol::RoomSummary;
use parlor_shared::types::{RoomId, UserId};
use parlor_store::{Message, Room, StoreError};

use crate::collaborators::{BlockList, UserDirectory};
use crate::error::{ChatError, Result};
use crate::pool::DbPool;
use crate::views::snippet;

#[derive(Clone)]
pub struct RoomSummaryBuilder {
    pool: DbPool,
    blocks: Arc<dyn BlockList>,
    directory: Arc<dyn UserDirectory>,
}

struct Snapshot {
    room: Room,
    peer: Option<UserId>,
    last: Option<Message>,
    unread: u32,
    active: u32,
}

impl RoomSummaryBuilder {
    pub fn new(pool: DbPool, blocks: Arc<dyn BlockList>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            pool,
            blocks,
            directory,
        }
    }

    /// Summary of `room` as `for_user` sees it.
    pub async fn build(&self, room: RoomId, for_user: UserId) -> Result<RoomSummary> {
        let blocked = self
            .blocks
            .blocked_user_ids(for_user)
            .await
            .map_err(ChatError::upstream)?;
        let hidden = self.hidden_senders(room, for_user, &blocked).await?;
        let snapshot = self.snapshot(room, for_user, hidden).await?;
        Ok(self.render(snapshot).await)
    }

    /// Every room `user` is active in, newest activity first. 1:1 rooms whose
    /// peer `user` has blocked are left out.
    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<RoomSummary>> {
        let blocked = self
            .blocks
            .blocked_user_ids(user)
            .await
            .map_err(ChatError::upstream)?;
        let rooms = self
            .pool
            .run(move |db| db.list_rooms_for_user(user))
            .await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let hidden = self.hidden_senders(room.id, user, &blocked).await?;
            let snapshot = match self.snapshot(room.id, user, hidden).await {
                Ok(s) => s,
                // deleted between the listing and this read
                Err(ChatError::Store(StoreError::RoomNotFound(_))) => continue,
                Err(e) => return Err(e),
            };
            if snapshot.peer.is_some_and(|peer| blocked.contains(&peer)) {
                continue;
            }
            summaries.push(self.render(snapshot).await);
        }

        summaries.sort_by(|a, b| {
            b.last_message_time
                .cmp(&a.last_message_time)
                .then(b.room_id.cmp(&a.room_id))
        });
        Ok(summaries)
    }

    /// Senders whose messages `user` must not see in the preview: everyone
    /// `user` blocked plus every participant, past or present, who blocked
    /// `user`.
    async fn hidden_senders(
        &self,
        room: RoomId,
        user: UserId,
        blocked: &[UserId],
    ) -> Result<Vec<UserId>> {
        let participants = self.pool.run(move |db| db.list_participants(room)).await?;
        let candidates: Vec<UserId> = participants
            .into_iter()
            .map(|p| p.user_id)
            .filter(|id| *id != user && !blocked.contains(id))
            .collect();

        let blocked_me = try_join_all(
            candidates
                .iter()
                .map(|&other| self.blocks.exists_block(other, user)),
        )
        .await
        .map_err(ChatError::upstream)?;

        let mut hidden = blocked.to_vec();
        hidden.extend(
            candidates
                .into_iter()
                .zip(blocked_me)
                .filter_map(|(other, blocks_user)| blocks_user.then_some(other)),
        );
        Ok(hidden)
    }

    async fn snapshot(&self, room: RoomId, user: UserId, hidden: Vec<UserId>) -> Result<Snapshot> {
        self.pool
            .run(move |db| {
                let room = db.get_room(room)?;
                let peer = if room.is_group {
                    None
                } else {
                    db.peer_of(room.id, user)?
                };
                let last = db.latest_message_excluding(room.id, &hidden)?;
                // counted on the newest message, hidden or not
                let unread = match db.newest_message_id(room.id)? {
                    Some(newest) => match db.unread_count_for_message(newest) {
                        Ok(n) => n,
                        // deleted since the lookup
                        Err(StoreError::MessageNotFound(_)) => 0,
                        Err(e) => return Err(e),
                    },
                    None => 0,
                };
                let active = db.active_count(room.id)?;
                Ok(Snapshot {
                    room,
                    peer,
                    last,
                    unread,
                    active,
                })
            })
            .await
    }

    async fn render(&self, snapshot: Snapshot) -> RoomSummary {
        let Snapshot {
            room,
            peer,
            last,
            unread,
            active,
        } = snapshot;

        let (room_name, room_image_url) = match peer {
            Some(peer) => match self.directory.profile(peer).await {
                Ok(Some(profile)) => (profile.display_name(), profile.image_url),
                Ok(None) => (UNKNOWN_USER_NAME.to_string(), None),
                Err(e) => {
                    tracing::warn!(room = %room.id, peer = %peer, error = %e, "profile lookup failed");
                    (UNKNOWN_USER_NAME.to_string(), None)
                }
            },
            None if room.is_group => (room.name.clone().unwrap_or_default(), room.image_url.clone()),
            None => (UNKNOWN_USER_NAME.to_string(), None),
        };

        RoomSummary {
            room_id: room.id,
            room_name,
            last_message_content: last.as_ref().map(snippet),
            last_message_time: last.as_ref().map(|m| m.sent_at).unwrap_or(room.created_at),
            room_image_url,
            unread_count: unread,
            participant_count: active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryBlockList, MemoryDirectory, UserProfile};
    use parlor_shared::types::MessageKind;
    use parlor_store::NewMessage;

    struct Fixture {
        pool: DbPool,
        blocks: Arc<MemoryBlockList>,
        builder: RoomSummaryBuilder,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::open(&dir.path().join("summary.db"), 2).unwrap();
        let blocks = Arc::new(MemoryBlockList::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert(UserProfile {
            user_id: UserId(2),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            image_url: Some("https://img.test/grace.png".into()),
            translate_language: None,
        });
        let builder = RoomSummaryBuilder::new(pool.clone(), blocks.clone(), directory);
        Fixture {
            pool,
            blocks,
            builder,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn one_to_one_summary_uses_peer_profile() {
        let f = fixture();
        let room = f
            .pool
            .run(|db| {
                let (room, _) = db.create_one_to_one(UserId(1), UserId(2))?;
                db.post_message(room.id, UserId(2), NewMessage::text("hey")?)?;
                db.post_message(
                    room.id,
                    UserId(2),
                    NewMessage::media("chats/1/p.png", MessageKind::Image)?,
                )?;
                Ok(room)
            })
            .await
            .unwrap();

        let summary = f.builder.build(room.id, UserId(1)).await.unwrap();
        assert_eq!(summary.room_name, "Grace Hopper");
        assert_eq!(summary.room_image_url.as_deref(), Some("https://img.test/grace.png"));
        assert_eq!(summary.last_message_content.as_deref(), Some("sent a photo"));
        // user 1 has not read the photo yet, its sender has
        assert_eq!(summary.unread_count, 1);
        assert_eq!(summary.participant_count, 2);

        let theirs = f.builder.build(room.id, UserId(2)).await.unwrap();
        assert_eq!(theirs.room_name, UNKNOWN_USER_NAME);
        assert_eq!(theirs.unread_count, 1);
    }

    #[tokio::test]
    async fn empty_room_falls_back_to_creation_time() {
        let f = fixture();
        let room = f
            .pool
            .run(|db| db.create_group(UserId(1), "Quiet", None, Some("https://img.test/q.png")))
            .await
            .unwrap();

        let summary = f.builder.build(room.id, UserId(1)).await.unwrap();
        assert_eq!(summary.room_name, "Quiet");
        assert_eq!(summary.last_message_content, None);
        assert_eq!(summary.last_message_time, room.created_at);
    }

    #[tokio::test]
    async fn group_preview_skips_blocked_senders() {
        let f = fixture();
        let room = f
            .pool
            .run(|db| {
                let room = db.create_group(UserId(1), "g", None, None)?;
                db.join_group(room.id, UserId(2))?;
                db.join_group(room.id, UserId(3))?;
                db.post_message(room.id, UserId(2), NewMessage::text("visible")?)?;
                db.post_message(room.id, UserId(3), NewMessage::text("hidden")?)?;
                Ok(room)
            })
            .await
            .unwrap();
        f.blocks.block(UserId(1), UserId(3));

        let summary = f.builder.build(room.id, UserId(1)).await.unwrap();
        assert_eq!(summary.last_message_content.as_deref(), Some("visible"));
        assert_eq!(summary.participant_count, 3);
    }

    #[tokio::test]
    async fn room_list_hides_blocked_peers_and_sorts_by_activity() {
        let f = fixture();
        let (dm, blocked_dm, group) = f
            .pool
            .run(|db| {
                let (dm, _) = db.create_one_to_one(UserId(1), UserId(2))?;
                let (blocked_dm, _) = db.create_one_to_one(UserId(1), UserId(4))?;
                let group = db.create_group(UserId(1), "later", None, None)?;
                db.post_message(dm.id, UserId(2), NewMessage::text("old news")?)?;
                Ok((dm, blocked_dm, group))
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let group_id = group.id;
        f.pool
            .run(move |db| db.post_message(group_id, UserId(1), NewMessage::text("fresh")?))
            .await
            .unwrap();
        f.blocks.block(UserId(1), UserId(4));

        let list = f.builder.list_for_user(UserId(1)).await.unwrap();
        let ids: Vec<RoomId> = list.iter().map(|s| s.room_id).collect();
        assert_eq!(ids, vec![group.id, dm.id]);
        assert!(!ids.contains(&blocked_dm.id));
    }

    #[tokio::test]
    async fn unread_count_tracks_readers_behind_the_newest_message() {
        let f = fixture();
        let (room, hi) = f
            .pool
            .run(|db| {
                let room = db.create_group(UserId(1), "g", None, None)?;
                db.join_group(room.id, UserId(2))?;
                db.join_group(room.id, UserId(3))?;
                let hi = db.post_message(room.id, UserId(1), NewMessage::text("hi")?)?;
                Ok((room, hi.message))
            })
            .await
            .unwrap();

        let summary = f.builder.build(room.id, UserId(1)).await.unwrap();
        assert_eq!(summary.unread_count, 2);
        assert_eq!(summary.participant_count, 3);

        let (room_id, hi_id) = (room.id, hi.id);
        f.pool
            .run(move |db| db.advance_read_cursor(room_id, UserId(2), hi_id))
            .await
            .unwrap();
        assert_eq!(f.builder.build(room.id, UserId(3)).await.unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn preview_hides_senders_who_blocked_the_viewer() {
        let f = fixture();
        let (group, dm) = f
            .pool
            .run(|db| {
                let group = db.create_group(UserId(3), "g", None, None)?;
                db.join_group(group.id, UserId(1))?;
                db.join_group(group.id, UserId(2))?;
                db.post_message(group.id, UserId(3), NewMessage::text("earlier")?)?;
                db.post_message(group.id, UserId(1), NewMessage::text("from A")?)?;
                let (dm, _) = db.create_one_to_one(UserId(1), UserId(2))?;
                db.post_message(dm.id, UserId(1), NewMessage::text("from A")?)?;
                Ok((group, dm))
            })
            .await
            .unwrap();
        f.blocks.block(UserId(1), UserId(2));

        let list = f.builder.list_for_user(UserId(2)).await.unwrap();
        assert!(list
            .iter()
            .all(|s| s.last_message_content.as_deref() != Some("from A")));

        let group_view = f.builder.build(group.id, UserId(2)).await.unwrap();
        assert_eq!(group_view.last_message_content.as_deref(), Some("earlier"));
        let dm_view = f.builder.build(dm.id, UserId(2)).await.unwrap();
        assert_eq!(dm_view.last_message_content, None);
        assert_eq!(dm_view.last_message_time, dm.created_at);

        // the blocker still sees their own messages
        let theirs = f.builder.build(group.id, UserId(1)).await.unwrap();
        assert_eq!(theirs.last_message_content.as_deref(), Some("from A"));
    }
}
