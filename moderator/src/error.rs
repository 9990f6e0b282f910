//! Engine error types
//!
//! Business-rule violations are [`Rejection`]s wrapped in
//! [`EngineError::Validation`]; they never mutate a session. Duplicate
//! deliveries are not errors at all, see [`Submission`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::{PlayerId, RoomId, SubPhase};
use crate::state::StoreError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Why a command was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("game has ended")]
    GameEnded,

    #[error("wrong sub-phase: expected {expected}, game is in {actual}")]
    WrongSubPhase { expected: String, actual: SubPhase },

    #[error("player {0} may not act now")]
    NotEligible(PlayerId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("{0} has already been used this game")]
    ConsumableSpent(String),

    #[error("lobby is full ({0} players)")]
    LobbyFull(usize),

    #[error("no open lobby in this room")]
    NoLobby,

    #[error("player {0} already joined")]
    AlreadyJoined(PlayerId),

    #[error("player {0} is not in the lobby")]
    NotInLobby(PlayerId),

    #[error("not enough players: have {have}, need {need}")]
    NotEnoughPlayers { have: usize, need: usize },

    #[error("{roles} roles for {players} players")]
    RoleCountMismatch { players: usize, roles: usize },

    #[error("invalid composition: {0}")]
    InvalidComposition(String),

    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),

    #[error("invalid lobby options: {0}")]
    InvalidLobbyOptions(String),
}

impl Rejection {
    /// Machine-readable code for command surfaces
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::GameEnded => "GAME_ENDED",
            Rejection::WrongSubPhase { .. } => "WRONG_SUB_PHASE",
            Rejection::NotEligible(_) => "NOT_ELIGIBLE",
            Rejection::UnknownPlayer(_) => "UNKNOWN_PLAYER",
            Rejection::InvalidTarget { .. } => "INVALID_TARGET",
            Rejection::ConsumableSpent(_) => "CONSUMABLE_SPENT",
            Rejection::LobbyFull(_) => "LOBBY_FULL",
            Rejection::NoLobby => "NO_LOBBY",
            Rejection::AlreadyJoined(_) => "ALREADY_JOINED",
            Rejection::NotInLobby(_) => "NOT_IN_LOBBY",
            Rejection::NotEnoughPlayers { .. } => "NOT_ENOUGH_PLAYERS",
            Rejection::RoleCountMismatch { .. } => "ROLE_COUNT_MISMATCH",
            Rejection::InvalidComposition(_) => "INVALID_COMPOSITION",
            Rejection::InvalidRoomId(_) => "INVALID_ROOM_ID",
            Rejection::InvalidLobbyOptions(_) => "INVALID_LOBBY_OPTIONS",
        }
    }

    pub(crate) fn target(target: impl ToString, reason: impl Into<String>) -> Self {
        Rejection::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn wrong_step(expected: impl ToString, actual: SubPhase) -> Self {
        Rejection::WrongSubPhase {
            expected: expected.to_string(),
            actual,
        }
    }
}

/// Engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rejected: {0}")]
    Validation(#[from] Rejection),

    #[error("no session for room {0}")]
    SessionNotFound(RoomId),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("recovery found room {room} inconsistent: {detail}")]
    RecoveryInconsistency { room: RoomId, detail: String },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(r) => r.code(),
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::Persistence(_) => "PERSISTENCE",
            EngineError::RecoveryInconsistency { .. } => "RECOVERY_INCONSISTENCY",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

/// Outcome of an externally triggered command.
///
/// A retried delivery that finds its claim already taken is
/// `AlreadyClaimed`; a vote that can have no effect is `Ignored`. Neither
/// changes the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Submission<T> {
    Accepted(T),
    AlreadyClaimed,
    Ignored,
}

impl<T> Submission<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Submission::Accepted(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Submission<U> {
        match self {
            Submission::Accepted(v) => Submission::Accepted(f(v)),
            Submission::AlreadyClaimed => Submission::AlreadyClaimed,
            Submission::Ignored => Submission::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err: EngineError = Rejection::wrong_step("witch", SubPhase::Seer).into();
        assert_eq!(err.code(), "WRONG_SUB_PHASE");
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "rejected: wrong sub-phase: expected witch, game is in seer"
        );
        assert_eq!(
            EngineError::SessionNotFound("r".into()).code(),
            "SESSION_NOT_FOUND"
        );
    }

    #[test]
    fn test_submission_map() {
        let s: Submission<u8> = Submission::Accepted(2);
        assert_eq!(s.map(|v| v * 2), Submission::Accepted(4));
        let dup: Submission<u8> = Submission::AlreadyClaimed;
        assert!(!dup.is_accepted());
        assert_eq!(dup.accepted(), None);
    }
}
