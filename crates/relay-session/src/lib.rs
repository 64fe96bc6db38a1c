//! Session registry and rendezvous protocols for the agent relay.
//!
//! Provides:
//! - `Session` - History, inbox and pending handshakes of one agent
//! - `SessionRegistry` - Lazy creation, listing and idle expiry
//! - `RendezvousCoordinator` - Every relay operation, keyed by session id

pub mod coordinator;
pub mod registry;
pub mod rendezvous;
pub mod session;

pub use coordinator::RendezvousCoordinator;
pub use registry::SessionRegistry;
pub use rendezvous::{Rendezvous, TimeoutOutcome};
pub use session::Session;
