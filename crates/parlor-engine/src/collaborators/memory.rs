use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use parlor_shared::protocol::NotificationEvent;
use parlor_shared::types::UserId;

use super::{BlockList, Notifier, Translator, UserDirectory, UserProfile};

/// Block relationships held in memory.
#[derive(Default)]
pub struct MemoryBlockList {
    blocked: DashMap<UserId, HashSet<UserId>>,
}

impl MemoryBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, blocker: UserId, blocked: UserId) {
        self.blocked.entry(blocker).or_default().insert(blocked);
    }

    pub fn unblock(&self, blocker: UserId, blocked: UserId) {
        if let Some(mut set) = self.blocked.get_mut(&blocker) {
            set.remove(&blocked);
        }
    }
}

#[async_trait]
impl BlockList for MemoryBlockList {
    async fn exists_block(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        Ok(self
            .blocked
            .get(&blocker)
            .is_some_and(|set| set.contains(&blocked)))
    }

    async fn blocked_user_ids(&self, user: UserId) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self
            .blocked
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

/// User profiles held in memory.
#[derive(Default)]
pub struct MemoryDirectory {
    profiles: DashMap<UserId, UserProfile>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id, profile);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(&user).map(|p| p.clone()))
    }
}

/// Translator that returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, texts: &[String], _target_lang: &str) -> Result<Vec<String>> {
        Ok(texts.to_vec())
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        tracing::info!(
            recipient = %event.recipient_id,
            actor = %event.actor_id,
            reference = event.reference_id,
            "notification"
        );
        Ok(())
    }
}

/// Notifier that forwards every event into a channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, event: NotificationEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
    }
}
