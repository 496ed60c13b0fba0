//! Per-channel session registry.
//!
//! One `ChannelSession` per destination channel serializes turns (a new turn
//! waits for the running one to reach a terminal state) and tracks the newest
//! message seen in the channel, which the platform side uses for reply
//! threading.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug)]
pub struct ChannelSession {
    key: String,
    turn_lock: Arc<Mutex<()>>,
    latest_message: AtomicU64,
}

impl ChannelSession {
    fn new(key: String) -> Self {
        Self {
            key,
            turn_lock: Arc::new(Mutex::new(())),
            latest_message: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record a message seen in the channel. Snowflake-style ids only grow,
    /// so the newest id wins regardless of arrival order.
    pub fn observe_message(&self, id: u64) {
        self.latest_message.fetch_max(id, Ordering::AcqRel);
    }

    /// Newest message id observed, or 0 if none.
    pub fn latest_message(&self) -> u64 {
        self.latest_message.load(Ordering::Acquire)
    }

    /// True while a turn holds the lock.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Wait for any running turn in this channel to finish, then take the
    /// turn. Waiters are served in arrival order.
    pub async fn begin_turn(self: &Arc<Self>) -> TurnGuard {
        if self.is_busy() {
            debug!(channel = %self.key, "turn queued behind active turn");
        }
        let guard = self.turn_lock.clone().lock_owned().await;
        TurnGuard {
            _guard: guard,
            session: Arc::clone(self),
        }
    }
}

/// Held for the lifetime of one turn; dropping it lets the next turn start.
#[derive(Debug)]
pub struct TurnGuard {
    _guard: OwnedMutexGuard<()>,
    session: Arc<ChannelSession>,
}

impl TurnGuard {
    pub fn session(&self) -> &Arc<ChannelSession> {
        &self.session
    }
}

/// Channel id -> session, created on first use.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ChannelSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, key: &str) -> Arc<ChannelSession> {
        if let Some(existing) = self.sessions.get(key) {
            return Arc::clone(existing.value());
        }
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(ChannelSession::new(key.to_string())))
            .clone()
    }

    /// Drop sessions nobody is using: no running turn and no outstanding
    /// handle. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| Arc::strong_count(session) > 1 || session.is_busy());
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "evicted idle channel sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
