//! The inbound request surface of the chat engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use parlor_shared::constants::{AROUND_WINDOW, FIRST_PAGE_SIZE, MESSAGE_PAGE_SIZE, MEDIA_KEY_PREFIX};
use parlor_shared::protocol::{MessageView, RoomSummary};
use parlor_shared::types::{MessageId, MessageKind, RoomId, UserId};
use parlor_store::{Departure, GroupMatch, Message, NewMessage, Participant, Room, Transition};

use crate::collaborators::{media_key, Collaborators, UploadTicket, UserProfile};
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::fanout::Broadcaster;
use crate::hub::EventHub;
use crate::pool::DbPool;
use crate::presence::PresenceRegistry;
use crate::read_tracker::{ReadReceipt, ReadTracker};
use crate::summary::RoomSummaryBuilder;
use crate::views::{message_view, translate_within};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub message_id: MessageId,
    /// `false` when the message was already gone.
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: UserId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub is_host: bool,
    /// Holds at least one open event stream.
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub room_id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub participant_count: u32,
}

impl From<GroupMatch> for GroupView {
    fn from(m: GroupMatch) -> Self {
        Self {
            room_id: m.room.id,
            name: m.room.name.unwrap_or_default(),
            description: m.room.description,
            image_url: m.room.image_url,
            participant_count: m.participant_count,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// How one participant sees a room's history.
struct Viewer {
    participant: Participant,
    blocked: HashSet<UserId>,
    /// Target language when translation is on and the profile names one.
    lang: Option<String>,
}

#[derive(Clone)]
pub struct ChatService {
    pool: DbPool,
    hub: EventHub,
    config: Arc<EngineConfig>,
    collab: Collaborators,
    summaries: RoomSummaryBuilder,
    reads: ReadTracker,
    fanout: Broadcaster,
    presence: Arc<PresenceRegistry>,
}

impl ChatService {
    pub fn new(pool: DbPool, config: EngineConfig, collab: Collaborators) -> Self {
        let config = Arc::new(config);
        let hub = EventHub::with_capacity(config.hub_capacity);
        let summaries = RoomSummaryBuilder::new(
            pool.clone(),
            Arc::clone(&collab.blocks),
            Arc::clone(&collab.directory),
        );
        let reads = ReadTracker::new(pool.clone(), hub.clone(), summaries.clone());
        let fanout = Broadcaster::new(
            hub.clone(),
            summaries.clone(),
            Arc::clone(&collab.translator),
            Arc::clone(&collab.notifier),
            Arc::clone(&collab.blocks),
            Arc::clone(&collab.directory),
            Arc::clone(&config),
        );

        Self {
            pool,
            hub,
            config,
            collab,
            summaries,
            reads,
            fanout,
            presence: PresenceRegistry::new(),
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- rooms ---------------------------------------------------------------

    pub async fn create_one_to_one(&self, requester: UserId, peer: UserId) -> Result<Room> {
        let (room, transitions) = self
            .pool
            .run(move |db| db.create_one_to_one(requester, peer))
            .await?;
        log_transitions(room.id, &transitions);
        Ok(room)
    }

    pub async fn create_group(&self, owner: UserId, group: NewGroup) -> Result<Room> {
        self.pool
            .run(move |db| {
                db.create_group(
                    owner,
                    &group.name,
                    group.description.as_deref(),
                    group.image_url.as_deref(),
                )
            })
            .await
    }

    pub async fn join_group(&self, room: RoomId, user: UserId) -> Result<Transition> {
        let transition = self.pool.run(move |db| db.join_group(room, user)).await?;
        log_transitions(room, &[transition]);
        self.refresh_summary(room, user);
        Ok(transition)
    }

    pub async fn leave(&self, room: RoomId, user: UserId) -> Result<Departure> {
        let departure = self.pool.run(move |db| db.leave_room(room, user)).await?;
        log_transitions(room, &departure.transitions);
        Ok(departure)
    }

    pub async fn is_group(&self, room: RoomId) -> Result<bool> {
        self.pool.run(move |db| db.is_group(room)).await
    }

    pub async fn list_rooms(&self, user: UserId) -> Result<Vec<RoomSummary>> {
        self.summaries.list_for_user(user).await
    }

    /// The summary row for a room `user` belongs to, left or active.
    pub async fn room_summary(&self, room: RoomId, user: UserId) -> Result<RoomSummary> {
        self.membership(room, user).await?;
        self.summaries.build(room, user).await
    }

    /// `user`'s participant row in `room`.
    ///
    /// `NOT_FOUND` for an unknown room, `FORBIDDEN` when the user was never
    /// part of it.
    pub async fn membership(&self, room: RoomId, user: UserId) -> Result<Participant> {
        self.pool
            .run(move |db| {
                db.get_room(room)?;
                Ok(db.find_participant(room, user)?)
            })
            .await?
            .ok_or_else(|| ChatError::Forbidden(format!("user {user} is not in room {room}")))
    }

    /// The user's rooms whose displayed name contains `keyword`.
    pub async fn search_my_rooms(&self, user: UserId, keyword: &str) -> Result<Vec<RoomSummary>> {
        let needle = keyword.trim().to_lowercase();
        let rooms = self.summaries.list_for_user(user).await?;
        Ok(rooms
            .into_iter()
            .filter(|s| s.room_name.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn room_participants(&self, room: RoomId) -> Result<Vec<ParticipantView>> {
        let (room, participants) = self
            .pool
            .run(move |db| Ok((db.get_room(room)?, db.active_participants(room)?)))
            .await?;

        let ids: Vec<UserId> = participants.iter().map(|p| p.user_id).collect();
        let profiles = self.profiles(&ids).await;

        Ok(participants
            .into_iter()
            .map(|p| {
                let profile = profiles.get(&p.user_id);
                ParticipantView {
                    user_id: p.user_id,
                    first_name: profile.map(|pr| pr.first_name.clone()),
                    last_name: profile.map(|pr| pr.last_name.clone()),
                    image_url: profile.and_then(|pr| pr.image_url.clone()),
                    is_host: room.is_group && room.owner_id == Some(p.user_id),
                    online: self.presence.is_online(p.user_id),
                }
            })
            .collect())
    }

    pub async fn search_groups(&self, keyword: &str) -> Result<Vec<GroupView>> {
        let keyword = keyword.to_string();
        let matches = self
            .pool
            .run(move |db| db.search_group_rooms(&keyword))
            .await?;
        Ok(matches.into_iter().map(GroupView::from).collect())
    }

    pub async fn latest_groups(&self, before: Option<RoomId>, limit: u32) -> Result<Vec<GroupView>> {
        let matches = self
            .pool
            .run(move |db| db.latest_group_rooms(before, limit))
            .await?;
        Ok(matches.into_iter().map(GroupView::from).collect())
    }

    pub async fn popular_groups(&self, limit: u32) -> Result<Vec<GroupView>> {
        let matches = self.pool.run(move |db| db.popular_group_rooms(limit)).await?;
        Ok(matches.into_iter().map(GroupView::from).collect())
    }

    pub async fn toggle_translation(&self, room: RoomId, user: UserId, enabled: bool) -> Result<Participant> {
        self.pool
            .run(move |db| db.set_translation(room, user, enabled))
            .await
    }

    pub async fn toggle_notifications(
        &self,
        room: RoomId,
        user: UserId,
        enabled: bool,
    ) -> Result<Participant> {
        self.pool
            .run(move |db| db.set_notifications(room, user, enabled))
            .await
    }

    // -- messages ------------------------------------------------------------

    /// A page of up to 20 messages older than `before`, newest first.
    pub async fn list_messages(
        &self,
        room: RoomId,
        viewer: UserId,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageView>> {
        self.page(room, viewer, before, MESSAGE_PAGE_SIZE).await
    }

    /// The latest 50 messages, newest first.
    pub async fn first_messages(&self, room: RoomId, viewer: UserId) -> Result<Vec<MessageView>> {
        self.page(room, viewer, None, FIRST_PAGE_SIZE).await
    }

    pub async fn messages_around(
        &self,
        room: RoomId,
        viewer: UserId,
        target: MessageId,
    ) -> Result<Vec<MessageView>> {
        let ctx = self.viewer(room, viewer).await?;
        let messages = self
            .pool
            .run(move |db| db.messages_around(room, target, AROUND_WINDOW))
            .await?;
        Ok(self.render(&ctx, messages, None).await)
    }

    /// Keyword search, newest first.
    ///
    /// With translation on, the whole visible history is translated and the
    /// keyword is matched against the translations.
    pub async fn search_keyword(
        &self,
        room: RoomId,
        viewer: UserId,
        keyword: &str,
    ) -> Result<Vec<MessageView>> {
        let keyword = keyword.trim().to_string();
        if keyword.is_empty() {
            return Err(ChatError::Validation("search keyword is empty".into()));
        }

        let ctx = self.viewer(room, viewer).await?;
        let visible_after = ctx.participant.visible_after();

        if let Some(lang) = ctx.lang.as_deref() {
            let history = self
                .pool
                .run(move |db| db.all_text_messages(room, visible_after))
                .await?;
            let history: Vec<Message> = history
                .into_iter()
                .filter(|m| !ctx.blocked.contains(&m.sender_id))
                .collect();
            let texts: Vec<String> = history.iter().map(|m| m.content.clone()).collect();

            if let Some(translated) = translate_within(
                self.collab.translator.as_ref(),
                &texts,
                lang,
                self.config.translation_timeout,
            )
            .await
            {
                let needle = keyword.to_lowercase();
                let mut translations = HashMap::new();
                let mut hits = Vec::new();
                for (message, text) in history.into_iter().zip(translated) {
                    if text.to_lowercase().contains(&needle) {
                        translations.insert(message.id, text);
                        hits.push(message);
                    }
                }
                return Ok(self.render(&ctx, hits, Some(translations)).await);
            }
            tracing::warn!(room = %room, viewer = %viewer, "falling back to untranslated search");
        }

        let messages = self
            .pool
            .run(move |db| db.search_messages(room, &keyword, visible_after))
            .await?;
        Ok(self.render(&ctx, messages, None).await)
    }

    /// Store a text message and fan it out. Returns the sender's view as
    /// soon as the message is persisted.
    pub async fn send_text(&self, room: RoomId, sender: UserId, content: &str) -> Result<MessageView> {
        let body = NewMessage::text(content)?;
        self.send(room, sender, body).await
    }

    /// Store a media message whose file was uploaded under `key`.
    pub async fn send_media(
        &self,
        room: RoomId,
        sender: UserId,
        key: &str,
        kind: MessageKind,
    ) -> Result<MessageView> {
        let expected_prefix = format!("{MEDIA_KEY_PREFIX}/{room}/");
        if !key.starts_with(&expected_prefix) {
            return Err(ChatError::Validation(format!(
                "media key must start with {expected_prefix}"
            )));
        }
        let body = NewMessage::media(key, kind)?;
        self.send(room, sender, body).await
    }

    async fn send(&self, room: RoomId, sender: UserId, body: NewMessage) -> Result<MessageView> {
        let (posted, participants) = self
            .pool
            .run(move |db| {
                let posted = db.post_message(room, sender, body)?;
                let participants = db.list_participants(room)?;
                Ok((posted, participants))
            })
            .await?;
        log_transitions(room, &posted.transitions);

        let sender_profile = self.profile(sender).await;
        let view = self.fanout.sender_view(&posted.message, sender_profile.as_ref());

        let fanout = self.fanout.clone();
        let message = posted.message;
        tokio::spawn(async move {
            fanout.deliver(message, participants).await;
        });

        Ok(view)
    }

    /// Hard-delete a message its author no longer wants. Deleting a message
    /// that is already gone succeeds with `deleted = false`.
    pub async fn delete_message(&self, id: MessageId, requester: UserId) -> Result<DeleteOutcome> {
        let removed = self
            .pool
            .run(move |db| db.delete_message(id, requester))
            .await?;

        match removed {
            Some(message) => {
                self.fanout.publish_delete(message.room_id, message.id).await;
                Ok(DeleteOutcome {
                    message_id: id,
                    deleted: true,
                })
            }
            None => {
                tracing::debug!(message = %id, "delete of missing message");
                Ok(DeleteOutcome {
                    message_id: id,
                    deleted: false,
                })
            }
        }
    }

    // -- reads ---------------------------------------------------------------

    pub async fn mark_read(&self, room: RoomId, reader: UserId, up_to: MessageId) -> Result<ReadReceipt> {
        self.reads.mark_read(room, reader, up_to).await
    }

    pub async fn mark_all_read(&self, room: RoomId, reader: UserId) -> Result<ReadReceipt> {
        self.reads.mark_all_read(room, reader).await
    }

    // -- ephemeral -----------------------------------------------------------

    pub async fn typing(&self, room: RoomId, user: UserId, is_typing: bool) -> Result<()> {
        let participant = self
            .pool
            .run(move |db| db.get_participant(room, user))
            .await?;
        if !participant.is_active() {
            return Err(ChatError::Forbidden(format!("user {user} has left room {room}")));
        }
        self.fanout.publish_typing(room, user, is_typing).await;
        Ok(())
    }

    pub async fn media_upload_url(&self, room: RoomId, user: UserId, filename: &str) -> Result<UploadTicket> {
        let participant = self
            .pool
            .run(move |db| db.get_participant(room, user))
            .await?;
        if !participant.is_active() {
            return Err(ChatError::Forbidden(format!("user {user} has left room {room}")));
        }

        let key = media_key(room, filename)
            .ok_or_else(|| ChatError::Validation(format!("unusable file name {filename:?}")))?;
        self.collab
            .uploads
            .sign_upload(&key)
            .map_err(ChatError::upstream)
    }

    // -- helpers -------------------------------------------------------------

    async fn page(
        &self,
        room: RoomId,
        viewer: UserId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageView>> {
        let ctx = self.viewer(room, viewer).await?;
        let visible_after = ctx.participant.visible_after();
        let messages = self
            .pool
            .run(move |db| db.page_before(room, before, limit, visible_after))
            .await?;
        Ok(self.render(&ctx, messages, None).await)
    }

    async fn viewer(&self, room: RoomId, user: UserId) -> Result<Viewer> {
        let participant = self.membership(room, user).await?;

        let blocked = self
            .collab
            .blocks
            .blocked_user_ids(user)
            .await
            .map_err(ChatError::upstream)?
            .into_iter()
            .collect();

        let lang = if participant.translate_enabled {
            self.profile(user).await.and_then(|p| p.translate_language)
        } else {
            None
        };

        Ok(Viewer {
            participant,
            blocked,
            lang,
        })
    }

    /// Views for `viewer`, dropping messages from users they blocked.
    async fn render(
        &self,
        ctx: &Viewer,
        messages: Vec<Message>,
        translations: Option<HashMap<MessageId, String>>,
    ) -> Vec<MessageView> {
        let messages: Vec<Message> = messages
            .into_iter()
            .filter(|m| !ctx.blocked.contains(&m.sender_id))
            .collect();

        let translations = match (translations, ctx.lang.as_deref()) {
            (Some(t), _) => t,
            (None, Some(lang)) => {
                let texts: Vec<&Message> = messages.iter().filter(|m| !m.kind.is_media()).collect();
                let input: Vec<String> = texts.iter().map(|m| m.content.clone()).collect();
                translate_within(
                    self.collab.translator.as_ref(),
                    &input,
                    lang,
                    self.config.translation_timeout,
                )
                .await
                .map(|out| texts.iter().map(|m| m.id).zip(out).collect())
                .unwrap_or_default()
            }
            (None, None) => HashMap::new(),
        };

        let mut senders: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        senders.sort();
        senders.dedup();
        let profiles = self.profiles(&senders).await;

        messages
            .iter()
            .map(|m| {
                message_view(
                    m,
                    profiles.get(&m.sender_id),
                    &self.config,
                    translations.get(&m.id).cloned(),
                )
            })
            .collect()
    }

    async fn profile(&self, user: UserId) -> Option<UserProfile> {
        match self.collab.directory.profile(user).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "profile lookup failed");
                None
            }
        }
    }

    async fn profiles(&self, users: &[UserId]) -> HashMap<UserId, UserProfile> {
        match self.collab.directory.profiles(users).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(count = users.len(), error = %e, "profile lookup failed");
                HashMap::new()
            }
        }
    }

    fn refresh_summary(&self, room: RoomId, user: UserId) {
        let summaries = self.summaries.clone();
        let hub = self.hub.clone();
        tokio::spawn(async move {
            match summaries.build(room, user).await {
                Ok(summary) => {
                    hub.publish(&parlor_shared::protocol::topic::room_list(user), &summary)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(room = %room, user = %user, error = %e, "summary refresh failed");
                }
            }
        });
    }
}

fn log_transitions(room: RoomId, transitions: &[Transition]) {
    for transition in transitions {
        match transition {
            Transition::RoomDeleted => tracing::info!(room = %room, "room deleted"),
            Transition::OwnershipTransferred { from, to } => {
                tracing::info!(room = %room, from = %from, to = %to, "ownership transferred")
            }
            other => tracing::debug!(room = %room, transition = ?other, "participant transition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::collaborators::{
        Blake3UploadSigner, ChannelNotifier, MemoryBlockList, MemoryDirectory, Translator,
    };
    use async_trait::async_trait;
    use parlor_shared::error::ErrorCode;
    use parlor_shared::protocol::{topic, NotificationEvent};
    use tokio::sync::broadcast::Receiver;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Pretends to translate into French by prefixing.
    struct Frenchify;

    #[async_trait]
    impl Translator for Frenchify {
        async fn translate(&self, texts: &[String], _lang: &str) -> anyhow::Result<Vec<String>> {
            Ok(texts
                .iter()
                .map(|t| t.replace("cat", "chat").replace("hello", "bonjour"))
                .collect())
        }
    }

    struct Env {
        service: ChatService,
        blocks: Arc<MemoryBlockList>,
        directory: Arc<MemoryDirectory>,
        notes: UnboundedReceiver<NotificationEvent>,
        _dir: tempfile::TempDir,
    }

    fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::open(&dir.path().join("service.db"), 3).unwrap();
        let blocks = Arc::new(MemoryBlockList::new());
        let directory = Arc::new(MemoryDirectory::new());
        let (notifier, notes) = ChannelNotifier::new();
        let collab = Collaborators {
            translator: Arc::new(Frenchify),
            notifier: Arc::new(notifier),
            blocks: blocks.clone(),
            directory: directory.clone(),
            uploads: Arc::new(Blake3UploadSigner::new(
                "https://upload.test",
                [1u8; 32],
                Duration::from_secs(900),
            )),
        };
        let config = EngineConfig {
            media_base_url: "https://media.test".into(),
            translation_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        Env {
            service: ChatService::new(pool, config, collab),
            blocks,
            directory,
            notes,
            _dir: dir,
        }
    }

    async fn next(rx: &mut Receiver<serde_json::Value>) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn sent_text_is_first_on_the_latest_page() {
        let mut env = env();
        let (u1, u2) = (UserId(1), UserId(2));
        let room = env.service.create_one_to_one(u1, u2).await.unwrap();
        let mut inbox = env
            .service
            .hub()
            .subscribe(&topic::room_messages(u2, room.id))
            .await;

        let sent = env.service.send_text(room.id, u1, "hello there").await.unwrap();
        let page = env.service.first_messages(room.id, u2).await.unwrap();

        assert_eq!(page[0].id, sent.id);
        assert_eq!(page[0].origin_content, "hello there");
        assert_eq!(page[0].sent_at, sent.sent_at);
        assert_eq!(page[0].message_type, MessageKind::Text);

        let pushed: MessageView = serde_json::from_value(next(&mut inbox).await).unwrap();
        assert_eq!(pushed.id, sent.id);

        let note = tokio::time::timeout(Duration::from_secs(2), env.notes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.recipient_id, u2);
        assert_eq!(note.reference_id, room.id.0);
    }

    #[tokio::test]
    async fn media_messages_expose_full_url_and_fixed_snippet() {
        let mut env = env();
        let room = env
            .service
            .create_one_to_one(UserId(1), UserId(2))
            .await
            .unwrap();
        let ticket = env
            .service
            .media_upload_url(room.id, UserId(1), "beach.png")
            .await
            .unwrap();
        assert!(ticket.key.starts_with(&format!("chats/{}/", room.id)));
        assert!(ticket.upload_url.starts_with("https://upload.test/chats/"));

        let view = env
            .service
            .send_media(room.id, UserId(1), &ticket.key, MessageKind::Image)
            .await
            .unwrap();
        assert_eq!(view.origin_content, format!("https://media.test/{}", ticket.key));

        let note = tokio::time::timeout(Duration::from_secs(2), env.notes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.snippet.as_deref(), Some("sent a photo"));

        let err = env
            .service
            .send_media(room.id, UserId(1), "chats/999/x.png", MessageKind::Image)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);
        let err = env
            .service
            .send_media(room.id, UserId(1), &ticket.key, MessageKind::Text)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn delete_is_author_only_and_idempotent() {
        let env = env();
        let room = env
            .service
            .create_one_to_one(UserId(1), UserId(2))
            .await
            .unwrap();
        let sent = env.service.send_text(room.id, UserId(1), "oops").await.unwrap();
        let mut events = env.service.hub().subscribe(&topic::room_events(room.id)).await;

        let err = env
            .service
            .delete_message(sent.id, UserId(2))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let outcome = env.service.delete_message(sent.id, UserId(1)).await.unwrap();
        assert!(outcome.deleted);
        assert_eq!(
            next(&mut events).await,
            serde_json::json!({"type": "delete", "id": sent.id.0})
        );

        let again = env.service.delete_message(sent.id, UserId(1)).await.unwrap();
        assert!(!again.deleted);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn history_hides_blocked_senders() {
        let env = env();
        let owner = UserId(1);
        let room = env
            .service
            .create_group(
                owner,
                NewGroup {
                    name: "book club".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        env.service.join_group(room.id, UserId(2)).await.unwrap();
        env.service.send_text(room.id, owner, "welcome").await.unwrap();
        env.service.send_text(room.id, UserId(2), "spam").await.unwrap();
        env.blocks.block(owner, UserId(2));

        let page = env.service.list_messages(room.id, owner, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].origin_content, "welcome");

        let outsider = env
            .service
            .list_messages(room.id, UserId(7), None)
            .await
            .unwrap_err();
        assert_eq!(outsider.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn owner_handoff_then_room_disappears() {
        let env = env();
        let room = env
            .service
            .create_group(
                UserId(1),
                NewGroup {
                    name: "short-lived".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        env.service.join_group(room.id, UserId(2)).await.unwrap();
        env.service.send_text(room.id, UserId(2), "bye").await.unwrap();

        env.service.leave(room.id, UserId(1)).await.unwrap();
        let people = env.service.room_participants(room.id).await.unwrap();
        assert_eq!(people.len(), 1);
        assert!(people[0].is_host);
        assert_eq!(people[0].user_id, UserId(2));
        assert!(!people[0].online);

        env.service.presence().init();
        let session = env.service.presence().connect(UserId(2));
        assert!(env.service.room_participants(room.id).await.unwrap()[0].online);
        drop(session);
        assert!(!env.service.room_participants(room.id).await.unwrap()[0].online);

        let departure = env.service.leave(room.id, UserId(2)).await.unwrap();
        assert!(departure.room_deleted);
        let err = env
            .service
            .list_messages(room.id, UserId(2), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn keyword_search_uses_translations_when_enabled() {
        let env = env();
        let (u1, u2) = (UserId(1), UserId(2));
        env.directory.insert(UserProfile {
            user_id: u2,
            first_name: "Marie".into(),
            last_name: "Curie".into(),
            image_url: None,
            translate_language: Some("fr".into()),
        });
        let room = env.service.create_one_to_one(u1, u2).await.unwrap();
        env.service.send_text(room.id, u1, "my cat is asleep").await.unwrap();
        env.service.send_text(room.id, u1, "hello again").await.unwrap();

        let raw = env.service.search_keyword(room.id, u2, "chat").await.unwrap();
        assert!(raw.is_empty());

        env.service.toggle_translation(room.id, u2, true).await.unwrap();
        let hits = env.service.search_keyword(room.id, u2, "CHAT").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].origin_content, "my cat is asleep");
        assert_eq!(hits[0].target_content.as_deref(), Some("my chat is asleep"));

        let page = env.service.first_messages(room.id, u2).await.unwrap();
        assert_eq!(page[0].target_content.as_deref(), Some("bonjour again"));
    }

    #[tokio::test]
    async fn messages_around_and_room_listing() {
        let env = env();
        let room = env
            .service
            .create_one_to_one(UserId(1), UserId(2))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                env.service
                    .send_text(room.id, UserId(1), &format!("m{i}"))
                    .await
                    .unwrap()
                    .id,
            );
        }

        let around = env
            .service
            .messages_around(room.id, UserId(2), ids[2])
            .await
            .unwrap();
        assert_eq!(around.len(), 5);
        assert_eq!(around[0].id, ids[0]);

        let rooms = env.service.list_rooms(UserId(2)).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].unread_count, 1);
        assert_eq!(rooms[0].last_message_content.as_deref(), Some("m4"));

        let receipt = env.service.mark_all_read(room.id, UserId(2)).await.unwrap();
        assert_eq!(receipt.last_read_message_id, Some(ids[4]));
        let rooms = env.service.list_rooms(UserId(2)).await.unwrap();
        assert_eq!(rooms[0].unread_count, 0);
    }

    #[tokio::test]
    async fn typing_is_relayed_to_the_room() {
        let env = env();
        let room = env
            .service
            .create_one_to_one(UserId(1), UserId(2))
            .await
            .unwrap();
        let mut events = env.service.hub().subscribe(&topic::room_events(room.id)).await;

        env.service.typing(room.id, UserId(1), true).await.unwrap();
        assert_eq!(
            next(&mut events).await,
            serde_json::json!({
                "type": "typing",
                "roomId": room.id.0,
                "userId": 1,
                "isTyping": true
            })
        );

        let err = env.service.typing(room.id, UserId(9), true).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn group_discovery() {
        let env = env();
        env.service
            .create_group(
                UserId(1),
                NewGroup {
                    name: "Hiking Seoul".into(),
                    description: Some("weekend trails".into()),
                    image_url: None,
                },
            )
            .await
            .unwrap();

        let found = env.service.search_groups("seoul").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].participant_count, 1);
        assert!(env.service.is_group(found[0].room_id).await.unwrap());
        assert_eq!(env.service.latest_groups(None, 10).await.unwrap().len(), 1);
        assert_eq!(env.service.popular_groups(10).await.unwrap().len(), 1);

        let mine = env.service.search_my_rooms(UserId(1), "hiking").await.unwrap();
        assert_eq!(mine.len(), 1);
    }
}
