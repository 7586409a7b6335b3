//! # parlor-store
//!
//! Durable storage for chat rooms, participants and messages, backed by
//! SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`. Every state-changing operation runs in its own
//! `IMMEDIATE` transaction so that checks and writes (for example "is the
//! room empty now?" followed by the cascade delete) are atomic with respect
//! to other connections on the same file.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;
pub mod reads;
pub mod rooms;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
