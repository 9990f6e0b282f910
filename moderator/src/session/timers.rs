//! Per-room sub-phase timers
//!
//! At most one timer is armed per room. Each carries the transition sequence
//! it was armed for, so a timer that fires after the session has moved on is
//! recognised as stale by the handler. All timers hang off one root
//! [`CancellationToken`] and die together on shutdown.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::game::RoomId;

#[derive(Debug)]
struct ArmedTimer {
    seq: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct PhaseTimers {
    root: CancellationToken,
    armed: Mutex<HashMap<RoomId, ArmedTimer>>,
}

impl PhaseTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `after` unless cancelled first. Replaces the
    /// room's previous timer.
    pub fn arm(&self, room_id: &str, seq: u64, after: Duration, on_fire: BoxFuture<'static, ()>) {
        let token = self.root.child_token();
        let previous = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                room_id.to_string(),
                ArmedTimer {
                    seq,
                    token: token.clone(),
                },
            );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        debug!(room = room_id, seq, after_ms = after.as_millis() as u64, "Timer armed");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => on_fire.await,
            }
        });
    }

    pub fn cancel(&self, room_id: &str) {
        let removed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id);
        if let Some(timer) = removed {
            timer.token.cancel();
        }
    }

    /// Forget the timer for `seq` once it has fired
    pub fn disarm(&self, room_id: &str, seq: u64) {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if armed.get(room_id).map(|t| t.seq) == Some(seq) {
            armed.remove(room_id);
        }
    }

    /// Sequence the room's live timer was armed for
    pub fn armed(&self, room_id: &str) -> Option<u64> {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .map(|t| t.seq)
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}
