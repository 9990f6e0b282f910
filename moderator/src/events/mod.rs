//! Session event stream
//!
//! Committed mutations announce what happened through a broadcast bus.
//! Collaborators (chat renderer, spectator feed) subscribe with an
//! [`EventFilter`]; [`EventFilter::spectator`] hides lines that disclose a
//! living player's role.
//!
//! ```text
//! ┌──────────────┐  commit  ┌──────────────┐     ┌──────────────┐
//! │  UnitOfWork  │─────────▶│  Event Bus   │────▶│  Subscribers │
//! │  (staged)    │          │  (broadcast) │     │  (filtered)  │
//! └──────────────┘          └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use types::{EndReason, EngineEvent};
