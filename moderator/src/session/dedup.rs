//! Short-lived suppression of redelivered commands
//!
//! Chat transports may deliver the same command more than once. The first
//! delivery of a fingerprint is let through; identical deliveries within the
//! TTL are answered as already claimed without touching the session. A
//! command that fails is forgotten so the sender can retry.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::game::{PlayerId, RoomId};

/// Who sent which kind of command where
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub room_id: RoomId,
    pub actor: PlayerId,
    /// Command family, e.g. `night`, `vote:village`
    pub scope: String,
}

impl CommandKey {
    pub fn new(room_id: &str, actor: &str, scope: impl Into<String>) -> Self {
        Self {
            room_id: room_id.to_string(),
            actor: actor.to_string(),
            scope: scope.into(),
        }
    }
}

#[derive(Debug)]
struct Seen {
    fingerprint: String,
    at: Instant,
}

#[derive(Debug)]
pub struct CommandDeduplicator {
    ttl: Duration,
    seen: Mutex<HashMap<CommandKey, Seen>>,
}

impl CommandDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// True for a new command; false for a redelivery within the TTL.
    ///
    /// A different fingerprint under the same key replaces the earlier one.
    pub fn first_delivery(&self, key: &CommandKey, fingerprint: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.retain(|_, s| now.duration_since(s.at) < self.ttl);

        if let Some(previous) = seen.get(key) {
            if previous.fingerprint == fingerprint {
                return false;
            }
        }
        seen.insert(
            key.clone(),
            Seen {
                fingerprint: fingerprint.to_string(),
                at: now,
            },
        );
        true
    }

    /// Drop a recorded command so a retry is processed
    pub fn forget(&self, key: &CommandKey) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Drop everything recorded for a room
    pub fn forget_room(&self, room_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k, _| k.room_id != room_id);
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_within_ttl() {
        let dedup = CommandDeduplicator::new(Duration::from_secs(3));
        let key = CommandKey::new("r", "alice", "night");

        assert!(dedup.first_delivery(&key, "heal:bob"));
        assert!(!dedup.first_delivery(&key, "heal:bob"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(dedup.first_delivery(&key, "heal:bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_fingerprint_passes() {
        let dedup = CommandDeduplicator::new(Duration::from_secs(3));
        let key = CommandKey::new("r", "alice", "vote:village");

        assert!(dedup.first_delivery(&key, "bob"));
        assert!(dedup.first_delivery(&key, "carol"));
        assert!(dedup.first_delivery(&key, "bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget() {
        let dedup = CommandDeduplicator::new(Duration::from_secs(3));
        let key = CommandKey::new("r", "alice", "end");
        assert!(dedup.first_delivery(&key, ""));
        dedup.forget(&key);
        assert!(dedup.first_delivery(&key, ""));

        dedup.forget_room("r");
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_suppresses() {
        let dedup = CommandDeduplicator::new(Duration::ZERO);
        let key = CommandKey::new("r", "alice", "night");
        assert!(dedup.first_delivery(&key, "x"));
        assert!(dedup.first_delivery(&key, "x"));
    }
}
