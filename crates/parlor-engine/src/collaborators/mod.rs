//! Interfaces to services the chat engine consumes but does not own.
//!
//! Only the contracts live here, plus small in-process implementations used
//! by the server binary for local runs and by tests.

mod memory;
mod upload;

pub use memory::{ChannelNotifier, LogNotifier, MemoryBlockList, MemoryDirectory, NoopTranslator};
pub use upload::{media_key, Blake3UploadSigner};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use parlor_shared::protocol::NotificationEvent;
use parlor_shared::types::UserId;

// =============================================================================
// Translation
// =============================================================================

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `texts` into `target_lang`. The output has the same length
    /// and order as the input.
    async fn translate(&self, texts: &[String], target_lang: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Notifications
// =============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: NotificationEvent) -> Result<()>;
}

// =============================================================================
// Blocks
// =============================================================================

#[async_trait]
pub trait BlockList: Send + Sync {
    /// Whether `blocker` has blocked `blocked`. Directional.
    async fn exists_block(&self, blocker: UserId, blocked: UserId) -> Result<bool>;

    /// Users that `user` has blocked.
    async fn blocked_user_ids(&self, user: UserId) -> Result<Vec<UserId>>;

    async fn blocked_either_way(&self, a: UserId, b: UserId) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        Ok(self.exists_block(a, b).await? || self.exists_block(b, a).await?)
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub image_url: Option<String>,
    /// Language messages are translated into when the user enables it.
    pub translate_language: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user: UserId) -> Result<Option<UserProfile>>;

    /// Look up several users. Unknown users are absent from the map.
    async fn profiles(&self, users: &[UserId]) -> Result<HashMap<UserId, UserProfile>> {
        let mut out = HashMap::with_capacity(users.len());
        for user in users {
            if out.contains_key(user) {
                continue;
            }
            if let Some(profile) = self.profile(*user).await? {
                out.insert(*user, profile);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Media uploads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    /// Time-limited URL the client uploads the file to.
    pub upload_url: String,
    /// Storage key to send back in the media message.
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

pub trait UploadSigner: Send + Sync {
    fn sign_upload(&self, key: &str) -> Result<UploadTicket>;
}

/// The set of collaborators a [`ChatService`](crate::ChatService) talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub notifier: Arc<dyn Notifier>,
    pub blocks: Arc<dyn BlockList>,
    pub directory: Arc<dyn UserDirectory>,
    pub uploads: Arc<dyn UploadSigner>,
}
