//! Persisted row types
//!
//! Rows are bincode-encoded, so none of them use internally tagged enums or
//! conditional field skipping. Action log lines are stored as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{Player, PlayerId, RoomId, VoteKind};
use crate::roles::{ActionTarget, Consumable};

/// One seat of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub room_id: RoomId,
    pub seat: u16,
    pub player: Player,
}

/// First write for (room, cycle, action, actor) authorizes the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightActionClaim {
    pub room_id: RoomId,
    pub cycle: u32,
    pub action: String,
    pub actor: PlayerId,
    pub target: ActionTarget,
    pub claimed_at: DateTime<Utc>,
}

/// Mutable ballot row for (room, kind, ballot, voter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteClaim {
    pub room_id: RoomId,
    pub kind: VoteKind,
    pub ballot: u32,
    pub voter: PlayerId,
    pub target: Option<PlayerId>,
    pub claimed_at: DateTime<Utc>,
}

/// Game-lifetime claim on a one-shot item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumableClaim {
    pub room_id: RoomId,
    pub item: Consumable,
    pub claimant: PlayerId,
    pub cycle: u32,
    pub claimed_at: DateTime<Utc>,
}

/// Append-only moderator log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub room_id: RoomId,
    pub seq: u64,
    pub line: String,
    pub reveals_role: bool,
    pub at: DateTime<Utc>,
}

/// Result of an insert-only claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

impl ClaimOutcome {
    pub fn is_claimed(self) -> bool {
        self == ClaimOutcome::Claimed
    }
}

/// Result of a vote claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteClaimOutcome {
    /// No earlier ballot from this voter
    First,
    /// Replaced an earlier ballot
    Changed { previous: Option<PlayerId> },
    /// Same target as already recorded
    Unchanged,
}
