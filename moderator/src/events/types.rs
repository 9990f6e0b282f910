//! Events announced to collaborators after a session mutation commits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cascade::DeathCause;
use crate::game::{Phase, PlayerId, RoomId, SubPhase, Winner};
use crate::roles::Role;

/// Why a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A victory condition was met
    Victory,
    /// Administrative termination
    Forced,
    /// Living players reached the vote-to-end quorum
    VotedToEnd,
}

/// All engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    GameStarted {
        room_id: RoomId,
        game_id: Uuid,
        players: Vec<PlayerId>,
        timestamp: DateTime<Utc>,
    },

    PhaseChanged {
        room_id: RoomId,
        phase: Phase,
        sub_phase: SubPhase,
        day_count: u32,
        transition_seq: u64,
        timestamp: DateTime<Utc>,
    },

    /// Dead players' roles are public
    PlayerKilled {
        room_id: RoomId,
        player_id: PlayerId,
        role: Role,
        cause: DeathCause,
        timestamp: DateTime<Utc>,
    },

    /// The pack failed to reach a majority and votes again
    PackDisagreement {
        room_id: RoomId,
        round: u8,
        timestamp: DateTime<Utc>,
    },

    GameEnded {
        room_id: RoomId,
        winner: Option<Winner>,
        reason: EndReason,
        timestamp: DateTime<Utc>,
    },

    ActionLog {
        room_id: RoomId,
        line: String,
        reveals_role: bool,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::GameStarted { .. } => "game_started",
            EngineEvent::PhaseChanged { .. } => "phase_changed",
            EngineEvent::PlayerKilled { .. } => "player_killed",
            EngineEvent::PackDisagreement { .. } => "pack_disagreement",
            EngineEvent::GameEnded { .. } => "game_ended",
            EngineEvent::ActionLog { .. } => "action_log",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            EngineEvent::GameStarted { room_id, .. }
            | EngineEvent::PhaseChanged { room_id, .. }
            | EngineEvent::PlayerKilled { room_id, .. }
            | EngineEvent::PackDisagreement { room_id, .. }
            | EngineEvent::GameEnded { room_id, .. }
            | EngineEvent::ActionLog { room_id, .. } => room_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::GameStarted { timestamp, .. }
            | EngineEvent::PhaseChanged { timestamp, .. }
            | EngineEvent::PlayerKilled { timestamp, .. }
            | EngineEvent::PackDisagreement { timestamp, .. }
            | EngineEvent::GameEnded { timestamp, .. }
            | EngineEvent::ActionLog { timestamp, .. } => *timestamp,
        }
    }

    /// Whether the event discloses a living player's hidden role
    pub fn reveals_role(&self) -> bool {
        matches!(
            self,
            EngineEvent::ActionLog {
                reveals_role: true,
                ..
            }
        )
    }
}
