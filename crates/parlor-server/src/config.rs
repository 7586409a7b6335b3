use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parlor_engine::EngineConfig;
use parlor_shared::constants::{
    DEFAULT_DB_POOL_SIZE, DEFAULT_FANOUT_CONCURRENCY, DEFAULT_HTTP_PORT, DEFAULT_HUB_CAPACITY,
    DEFAULT_TRANSLATION_TIMEOUT_MS, DEFAULT_UPLOAD_TTL_SECS,
};

/// Server configuration, loaded from environment variables with sensible
/// defaults.
#[derive(Clone)]
pub struct ServerConfig {
    /// HTTP API listen address.
    /// Env: `HTTP_ADDR`
    pub http_addr: SocketAddr,

    /// SQLite database file. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Connections held open against the database.
    /// Env: `DB_POOL_SIZE`
    pub db_pool_size: usize,

    /// Env: `FANOUT_CONCURRENCY`
    pub fanout_concurrency: usize,

    /// Env: `TRANSLATION_TIMEOUT_MS`
    pub translation_timeout: Duration,

    /// Env: `HUB_CAPACITY`
    pub hub_capacity: usize,

    /// Base URL media keys are served from.
    /// Env: `MEDIA_BASE_URL`
    pub media_base_url: String,

    /// Base URL clients upload media to.
    /// Env: `UPLOAD_BASE_URL`
    pub upload_base_url: String,

    /// Key for signing upload URLs (64 hex chars). A random key is generated
    /// when unset, so signed URLs do not survive a restart.
    /// Env: `UPLOAD_SIGNING_KEY`
    pub upload_signing_key: Option<[u8; 32]>,

    /// Env: `UPLOAD_TTL_SECS`
    pub upload_ttl: Duration,

    /// Interval between keep-alive comments on event streams.
    /// Env: `SSE_KEEP_ALIVE_SECS`
    pub sse_keep_alive: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("db_pool_size", &self.db_pool_size)
            .field("fanout_concurrency", &self.fanout_concurrency)
            .field("translation_timeout", &self.translation_timeout)
            .field("hub_capacity", &self.hub_capacity)
            .field("media_base_url", &self.media_base_url)
            .field("upload_base_url", &self.upload_base_url)
            .field("upload_signing_key", &self.upload_signing_key.map(|_| "<redacted>"))
            .field("upload_ttl", &self.upload_ttl)
            .field("sse_keep_alive", &self.sse_keep_alive)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            db_pool_size: DEFAULT_DB_POOL_SIZE,
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
            translation_timeout: Duration::from_millis(DEFAULT_TRANSLATION_TIMEOUT_MS),
            hub_capacity: DEFAULT_HUB_CAPACITY,
            media_base_url: "http://localhost:8080/media".to_string(),
            upload_base_url: "http://localhost:8080/upload".to_string(),
            upload_signing_key: None,
            upload_ttl: Duration::from_secs(DEFAULT_UPLOAD_TTL_SECS),
            sse_keep_alive: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_positive(&var, "DB_POOL_SIZE") {
            config.db_pool_size = n;
        }
        if let Some(n) = parse_positive(&var, "FANOUT_CONCURRENCY") {
            config.fanout_concurrency = n;
        }
        if let Some(ms) = parse_positive(&var, "TRANSLATION_TIMEOUT_MS") {
            config.translation_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(n) = parse_positive(&var, "HUB_CAPACITY") {
            config.hub_capacity = n;
        }

        if let Some(url) = var("MEDIA_BASE_URL") {
            config.media_base_url = url;
        }
        if let Some(url) = var("UPLOAD_BASE_URL") {
            config.upload_base_url = url;
        }

        if let Some(hex_key) = var("UPLOAD_SIGNING_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.upload_signing_key = Some(key),
                Err(e) => tracing::warn!(error = %e, "Invalid UPLOAD_SIGNING_KEY, ignoring"),
            }
        }

        if let Some(secs) = parse_positive(&var, "UPLOAD_TTL_SECS") {
            config.upload_ttl = Duration::from_secs(secs as u64);
        }
        if let Some(secs) = parse_positive(&var, "SSE_KEEP_ALIVE_SECS") {
            config.sse_keep_alive = Duration::from_secs(secs as u64);
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// The subset of settings the chat engine consumes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fanout_concurrency: self.fanout_concurrency,
            translation_timeout: self.translation_timeout,
            hub_capacity: self.hub_capacity,
            media_base_url: self.media_base_url.clone(),
        }
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<usize> {
    let raw = var(name)?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(var = name, value = %raw, "Expected a positive integer, using default");
            None
        }
    }
}

fn parse_hex_key(raw: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(raw.trim()).map_err(|e| e.to_string())?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}
