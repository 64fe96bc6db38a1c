//! Core types for the agent relay.
//!
//! This crate provides the fundamental building blocks:
//! - `MsgStore` - Bounded per-session history with stable ids
//! - `MessageEntry` - Typed history entry
//! - `EventBus` - Best-effort broadcast to connected viewers
//! - `RelayConfig` - Capacities, deadlines and expiry thresholds
//! - Shared outcomes, summaries and errors

pub mod config;
pub mod entry;
pub mod events;
pub mod meta;
pub mod msg_store;
pub mod types;

pub use config::RelayConfig;
pub use entry::{Level, MessageEntry, MessageKind};
pub use events::{EventBus, RelayEvent};
pub use meta::SessionMeta;
pub use msg_store::MsgStore;
pub use types::{
    DEFAULT_SESSION, InstructionOutcome, QuestionOutcome, RelayError, SessionId, SessionSnapshot,
    SessionSummary, resolve_session_id,
};
