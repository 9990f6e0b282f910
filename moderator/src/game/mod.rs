//! Game aggregate, phase plan and read-only projections

pub mod plan;
pub mod snapshot;
pub mod types;

pub use plan::{Cursor, PhasePlan, PlanStep, StepCondition, StepContext};
pub use snapshot::{GameSnapshot, PlayerView, PrivateView};
pub use types::{
    CaptainVoteMode, DayScratch, Game, LoverBond, NightAction, NightScratch, Phase, Player,
    PlayerId, RoomId, SubPhase, VoteKind, Winner,
};
