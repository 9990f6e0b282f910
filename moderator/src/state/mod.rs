//! Durable session storage
//!
//! RocksDB-backed row store holding, per room:
//! - the session row (game aggregate without players)
//! - one row per seated player
//! - night action, vote and consumable claims
//! - the append-only action log
//!
//! # Claim-then-act
//!
//! A retried delivery must not apply twice. Every such write is staged as a
//! claim in a [`UnitOfWork`]; a claim that already exists reports
//! `AlreadyClaimed` and the caller performs no mutation. The unit commits its
//! claims together with the session and player rows in one `WriteBatch`.
//!
//! ```ignore
//! let store = StateStore::open("./moderator-state")?.shared();
//! let mut uow = UnitOfWork::new(&store, "room-1");
//! if uow.claim_consumable(Consumable::LifePotion, "u7", 2)?.is_claimed() {
//!     // apply the heal to the draft game
//! }
//! uow.commit(&draft)?;
//! ```

pub mod schema;
pub mod store;
pub mod types;
pub mod unit;

pub use store::{RowWrite, SharedStateStore, StateStore, StoreError, StoreResult};
pub use types::{
    ActionLogEntry, ClaimOutcome, ConsumableClaim, NightActionClaim, PlayerRow, VoteClaim,
    VoteClaimOutcome,
};
pub use unit::UnitOfWork;
