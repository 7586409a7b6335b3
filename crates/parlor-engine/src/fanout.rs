//! Per-recipient delivery of a stored message.
//!
//! Each recipient runs its own pipeline (block check, translation,
//! notification, message push, summary push) on a bounded-concurrency
//! stream. A failure stops that recipient's pipeline only.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use parlor_shared::protocol::{topic, MessageView, NotificationEvent, RoomEvent};
use parlor_shared::types::{MessageId, RoomId, UserId};
use parlor_store::{Message, Participant};

use crate::collaborators::{BlockList, Notifier, Translator, UserDirectory, UserProfile};
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::hub::EventHub;
use crate::summary::RoomSummaryBuilder;
use crate::views::{message_view, snippet, translate_within};

#[derive(Clone)]
pub struct Broadcaster {
    hub: EventHub,
    summaries: RoomSummaryBuilder,
    translator: Arc<dyn Translator>,
    notifier: Arc<dyn Notifier>,
    blocks: Arc<dyn BlockList>,
    directory: Arc<dyn UserDirectory>,
    config: Arc<EngineConfig>,
}

/// What happened for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Full pipeline ran.
    Delivered { translated: bool, notified: bool },
    /// Recipient has left; only the summary was pushed.
    SummaryOnly,
    /// A block exists between sender and recipient.
    Blocked,
}

impl Broadcaster {
    pub fn new(
        hub: EventHub,
        summaries: RoomSummaryBuilder,
        translator: Arc<dyn Translator>,
        notifier: Arc<dyn Notifier>,
        blocks: Arc<dyn BlockList>,
        directory: Arc<dyn UserDirectory>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            hub,
            summaries,
            translator,
            notifier,
            blocks,
            directory,
            config,
        }
    }

    /// Deliver `message` to every participant of its room.
    ///
    /// Returns one entry per recipient, in completion order. Failures are
    /// logged and reported, never propagated.
    pub async fn deliver(
        &self,
        message: Message,
        participants: Vec<Participant>,
    ) -> Vec<(UserId, Result<Delivery>)> {
        let sender_profile = match self.directory.profile(message.sender_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(sender = %message.sender_id, error = %e, "sender profile lookup failed");
                None
            }
        };

        let message = &message;
        let sender_profile = sender_profile.as_ref();
        let outcomes: Vec<(UserId, Result<Delivery>)> = stream::iter(participants)
            .map(|recipient| async move {
                let user = recipient.user_id;
                (user, self.deliver_to(message, sender_profile, recipient).await)
            })
            .buffer_unordered(self.config.fanout_concurrency.max(1))
            .collect()
            .await;

        for (recipient, outcome) in &outcomes {
            if let Err(e) = outcome {
                tracing::warn!(
                    room = %message.room_id,
                    message = %message.id,
                    recipient = %recipient,
                    error = %e,
                    "delivery failed"
                );
            }
        }

        tracing::debug!(
            room = %message.room_id,
            message = %message.id,
            recipients = outcomes.len(),
            "fan-out complete"
        );
        outcomes
    }

    async fn deliver_to(
        &self,
        message: &Message,
        sender: Option<&UserProfile>,
        recipient: Participant,
    ) -> Result<Delivery> {
        let user = recipient.user_id;

        if self
            .blocks
            .blocked_either_way(message.sender_id, user)
            .await
            .map_err(ChatError::upstream)?
        {
            return Ok(Delivery::Blocked);
        }

        if !recipient.is_active() {
            self.push_summary(message.room_id, user).await?;
            return Ok(Delivery::SummaryOnly);
        }

        let target_content = if recipient.translate_enabled && !message.kind.is_media() {
            self.translate_for(user, &message.content).await
        } else {
            None
        };
        let translated = target_content.is_some();

        let mut notified = false;
        if user != message.sender_id && recipient.notifications_enabled {
            let event = NotificationEvent::chat(user, message.sender_id, message.room_id, snippet(message));
            match self.notifier.publish(event).await {
                Ok(()) => notified = true,
                Err(e) => {
                    tracing::warn!(recipient = %user, error = %e, "notification failed");
                }
            }
        }

        let view = message_view(message, sender, &self.config, target_content);
        self.hub
            .publish(&topic::room_messages(user, message.room_id), &view)
            .await;

        self.push_summary(message.room_id, user).await?;

        Ok(Delivery::Delivered {
            translated,
            notified,
        })
    }

    async fn translate_for(&self, user: UserId, content: &str) -> Option<String> {
        let lang = match self.directory.profile(user).await {
            Ok(Some(profile)) => profile.translate_language?,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(recipient = %user, error = %e, "profile lookup failed");
                return None;
            }
        };

        translate_within(
            self.translator.as_ref(),
            &[content.to_string()],
            &lang,
            self.config.translation_timeout,
        )
        .await
        .and_then(|mut out| out.pop())
    }

    async fn push_summary(&self, room: RoomId, user: UserId) -> Result<()> {
        let summary = self.summaries.build(room, user).await?;
        self.hub.publish(&topic::room_list(user), &summary).await;
        Ok(())
    }

    /// Announce a deleted message on the room's structural channel.
    pub async fn publish_delete(&self, room: RoomId, id: MessageId) {
        self.hub
            .publish(&topic::room_events(room), &RoomEvent::Delete { id })
            .await;
    }

    pub async fn publish_typing(&self, room: RoomId, user: UserId, is_typing: bool) {
        self.hub
            .publish(
                &topic::room_events(room),
                &RoomEvent::Typing {
                    room_id: room,
                    user_id: user,
                    is_typing,
                },
            )
            .await;
    }

    /// The view `user` would receive for `message`, without publishing it.
    pub(crate) fn sender_view(&self, message: &Message, sender: Option<&UserProfile>) -> MessageView {
        message_view(message, sender, &self.config, None)
    }
}
