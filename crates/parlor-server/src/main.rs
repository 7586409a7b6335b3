//! # parlor-server
//!
//! HTTP front end for the Parlor chat engine.
//!
//! This binary provides:
//! - **REST API** (axum) for rooms, groups, messages, read cursors and typing
//! - **Server-sent event streams** relaying per-user message views, room list
//!   updates, unread counts and room events
//! - **Signed upload URLs** for image and video messages

mod api;
mod config;
mod error;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_engine::collaborators::{
    Blake3UploadSigner, Collaborators, LogNotifier, MemoryBlockList, MemoryDirectory,
    NoopTranslator,
};
use parlor_engine::{ChatService, DbPool};
use parlor_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,parlor_server=debug,parlor_engine=debug")
            }),
        )
        .init();

    info!("Starting Parlor chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    let pool = DbPool::open(&db_path, config.db_pool_size)?;
    info!(path = %db_path.display(), connections = pool.size(), "Database ready");

    let signing_key = match config.upload_signing_key {
        Some(key) => key,
        None => {
            tracing::warn!("UPLOAD_SIGNING_KEY not set, using a random key for this run");
            rand::random::<[u8; 32]>()
        }
    };

    // Block lists, profiles, translation and push delivery live in other
    // services; these stand-ins keep a single node usable on its own.
    let collaborators = Collaborators {
        translator: Arc::new(NoopTranslator),
        notifier: Arc::new(LogNotifier),
        blocks: Arc::new(MemoryBlockList::new()),
        directory: Arc::new(MemoryDirectory::new()),
        uploads: Arc::new(Blake3UploadSigner::new(
            config.upload_base_url.clone(),
            signing_key,
            config.upload_ttl,
        )),
    };

    let service = ChatService::new(pool, config.engine_config(), collaborators);
    service.presence().init();

    let app_state = AppState {
        service: service.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Drop hub topics nobody listens to any more (every 5 minutes)
    let hub = service.hub().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let removed = hub.cleanup().await;
            if removed > 0 {
                tracing::debug!(removed, "Pruned idle hub topics");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    service.presence().reset();

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
