use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use parlor_shared::constants::MEDIA_KEY_PREFIX;
use parlor_shared::types::RoomId;

use super::{UploadSigner, UploadTicket};

/// Storage key for a file uploaded into `room`: `chats/{room}/{uuid}-{name}`.
///
/// Only the final path component of `filename` is kept, and characters
/// outside `[A-Za-z0-9._-]` become `_`. Returns `None` when nothing usable
/// remains.
pub fn media_key(room: RoomId, filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base.chars().all(|c| c == '.') {
        return None;
    }

    let clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    Some(format!("{MEDIA_KEY_PREFIX}/{room}/{}-{clean}", Uuid::new_v4()))
}

/// Issues upload URLs signed with a keyed BLAKE3 hash over the storage key
/// and expiry. The object store verifies the same hash before accepting a
/// write.
pub struct Blake3UploadSigner {
    base_url: String,
    key: [u8; 32],
    ttl: Duration,
}

impl Blake3UploadSigner {
    pub fn new(base_url: impl Into<String>, key: [u8; 32], ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
            ttl,
        }
    }

    fn signature(&self, storage_key: &str, expires: i64) -> blake3::Hash {
        blake3::keyed_hash(&self.key, format!("{storage_key}\n{expires}").as_bytes())
    }

    /// Check a signature produced by [`sign_upload`](UploadSigner::sign_upload).
    pub fn verify(&self, storage_key: &str, expires: i64, signature_hex: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(given) = hex::decode(signature_hex) else {
            return false;
        };
        let expected = self.signature(storage_key, expires);
        let expected = expected.as_bytes();
        given.len() == expected.len() && given.as_slice().ct_eq(&expected[..]).unwrap_u8() == 1
    }
}

impl UploadSigner for Blake3UploadSigner {
    fn sign_upload(&self, storage_key: &str) -> Result<UploadTicket> {
        let ttl = chrono::Duration::from_std(self.ttl).context("upload ttl out of range")?;
        let expires_at = Utc::now() + ttl;
        let expires = expires_at.timestamp();
        let signature = self.signature(storage_key, expires);

        Ok(UploadTicket {
            upload_url: format!(
                "{}/{storage_key}?expires={expires}&signature={}",
                self.base_url,
                signature.to_hex()
            ),
            key: storage_key.to_string(),
            expires_at,
        })
    }
}
