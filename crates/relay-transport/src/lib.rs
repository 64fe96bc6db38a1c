//! Transport shell for the agent relay.
//!
//! Provides:
//! - Wire protocol (request bodies, pushed viewer events)
//! - Shared-token authentication
//! - HTTP API over the relay operations
//! - WebSocket push (feature: websocket) and SSE push

pub mod auth;
pub mod http;
pub mod protocol;
pub mod sse;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use http::{AppState, create_router};
pub use protocol::{ClientMessage, ServerEvent};
