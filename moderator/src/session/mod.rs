//! Session orchestration
//!
//! One [`SessionManager`] owns every live room: a [`SessionRegistry`] of
//! per-room mutexes, the lobbies waiting to start, one phase timer per room
//! and a short-lived command deduplicator. The transition rules themselves
//! live in [`Machine`], which runs synchronously inside a room's lock.

pub mod dedup;
pub mod lobby;
pub mod machine;
pub mod manager;
pub mod recovery;
pub mod registry;
pub mod timers;

pub use dedup::{CommandDeduplicator, CommandKey};
pub use lobby::{Lobby, LobbyBoard, LobbyOptions};
pub use machine::{ActionReceipt, EndVoteReceipt, Machine, VoteReceipt};
pub use manager::SessionManager;
pub use recovery::RecoveryReport;
pub use registry::{SessionHandle, SessionRegistry};
pub use timers::PhaseTimers;
