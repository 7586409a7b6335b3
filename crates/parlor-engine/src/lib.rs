//! # parlor-engine
//!
//! The chat messaging engine: sends, fan-out, read tracking and room
//! summaries on top of [`parlor_store`].
//!
//! Everything is reached through [`ChatService`]. Outbound traffic is
//! published on an in-process [`EventHub`] under the topics defined in
//! [`parlor_shared::protocol::topic`]; a transport layer subscribes to those
//! topics and forwards them to clients.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod pool;
pub mod presence;
pub mod read_tracker;
pub mod service;
pub mod summary;

mod views;

pub use config::EngineConfig;
pub use error::{ChatError, Result};
pub use hub::EventHub;
pub use pool::DbPool;
pub use presence::{PresenceGuard, PresenceRegistry};
pub use read_tracker::ReadReceipt;
pub use service::{ChatService, DeleteOutcome, GroupView, NewGroup, ParticipantView};
