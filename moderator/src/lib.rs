//! Village Moderator Engine
//!
//! Runs social-deduction game sessions, one per chat room:
//! - a phase machine walking a per-game plan of night and day steps
//! - a pure conflict resolver for each night's effects
//! - pack consensus voting with rerun and fallback
//! - a death cascade for bonds, extra lives, decoys and revenge shots
//! - claim-then-act persistence in RocksDB so redelivered commands apply once
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use moderator::{EngineConfig, LobbyOptions, SessionManager, rooms::AnyRoom};
//!
//! # async fn run() -> Result<(), moderator::EngineError> {
//! let manager = SessionManager::open(EngineConfig::default(), Arc::new(AnyRoom))?;
//! manager.recover().await?;
//! manager.create_session("room-1", LobbyOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cascade;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod game;
pub mod resolver;
pub mod roles;
pub mod rooms;
pub mod session;
pub mod state;
pub mod tally;

pub use cascade::DeathCause;
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use consensus::{PackFallback, TieBreak};
pub use error::{EngineError, EngineResult, Rejection, Submission};
pub use events::{EndReason, EngineEvent, EventBus, EventFilter, SharedEventBus};
pub use game::{Cursor, GameSnapshot, Phase, PlayerView, PrivateView, SubPhase, VoteKind, Winner};
pub use roles::{ActionKind, ActionTarget, Role};
pub use session::{
    ActionReceipt, EndVoteReceipt, LobbyOptions, RecoveryReport, SessionManager, VoteReceipt,
};
pub use state::{StateStore, StoreError};
