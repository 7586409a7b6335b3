//! Which users currently hold a live subscription.
//!
//! The registry is process-wide. [`PresenceRegistry::init`] marks it ready
//! for a serving session and [`PresenceRegistry::reset`] clears it, e.g. on
//! shutdown or between tests. Sessions are tracked through RAII guards so a
//! dropped connection always decrements its count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use parlor_shared::types::UserId;

#[derive(Default)]
pub struct PresenceRegistry {
    sessions: DashMap<UserId, usize>,
    ready: AtomicBool,
}

impl PresenceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start tracking. Any leftover state is discarded.
    pub fn init(&self) {
        self.sessions.clear();
        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!("presence registry initialised");
    }

    /// Stop tracking and forget every session.
    pub fn reset(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.sessions.clear();
        tracing::debug!("presence registry reset");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Register a session for `user`. The session ends when the guard drops.
    pub fn connect(self: &Arc<Self>, user: UserId) -> PresenceGuard {
        if self.is_ready() {
            *self.sessions.entry(user).or_insert(0) += 1;
        }
        PresenceGuard {
            registry: Arc::clone(self),
            user,
        }
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.session_count(user) > 0
    }

    pub fn session_count(&self, user: UserId) -> usize {
        self.sessions.get(&user).map(|n| *n).unwrap_or(0)
    }

    fn disconnect(&self, user: UserId) {
        self.sessions.remove_if_mut(&user, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }
}

/// Keeps a user's session counted while alive.
pub struct PresenceGuard {
    registry: Arc<PresenceRegistry>,
    user: UserId,
}

impl PresenceGuard {
    pub fn user(&self) -> UserId {
        self.user
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.registry.disconnect(self.user);
    }
}
