//! # parlor-shared
//!
//! Types shared by every Parlor crate: identifiers, message and participant
//! enums, the payloads published on the real-time channels, and the error
//! taxonomy surfaced to callers.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
