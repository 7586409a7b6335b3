use std::time::Duration;

use parlor_shared::constants::{
    DEFAULT_FANOUT_CONCURRENCY, DEFAULT_HUB_CAPACITY, DEFAULT_TRANSLATION_TIMEOUT_MS,
};

/// Tunables for the chat engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many recipients a single send processes at once.
    pub fanout_concurrency: usize,

    /// Upper bound on one translation call. Expiry counts as a failure and
    /// the recipient gets the untranslated text.
    pub translation_timeout: Duration,

    /// Buffered events per hub topic before slow subscribers lag.
    pub hub_capacity: usize,

    /// Prefix joined with a media key to form the URL clients download from.
    pub media_base_url: String,
}

impl EngineConfig {
    /// Full download URL for a stored media key.
    pub fn media_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.media_base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
            translation_timeout: Duration::from_millis(DEFAULT_TRANSLATION_TIMEOUT_MS),
            hub_capacity: DEFAULT_HUB_CAPACITY,
            media_base_url: "http://localhost:8080/media".to_string(),
        }
    }
}
