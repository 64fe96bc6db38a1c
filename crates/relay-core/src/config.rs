//! Tunables for history size, rendezvous deadlines and session expiry.

use std::time::Duration;

use serde::Deserialize;

use crate::{events::DEFAULT_EVENT_CAPACITY, msg_store::DEFAULT_CAPACITY};

const fn default_history_capacity() -> usize {
    DEFAULT_CAPACITY
}

const fn default_question_timeout_secs() -> u64 {
    5 * 60
}

const fn default_wait_timeout_ms() -> u64 {
    590_000
}

const fn default_session_expiry_secs() -> u64 {
    2 * 60 * 60
}

const fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

const fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// Relay configuration.
///
/// Every field has a default, so an empty document deserializes to
/// [`RelayConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Entries retained per session.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// How long `ask_question` blocks before timing out.
    #[serde(default = "default_question_timeout_secs")]
    pub question_timeout_secs: u64,
    /// Wait deadline used when the caller supplies none.
    #[serde(default = "default_wait_timeout_ms")]
    pub default_wait_timeout_ms: u64,
    /// Idle time after which a session is expired.
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u64,
    /// Period of the expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Buffer size of the viewer event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            question_timeout_secs: default_question_timeout_secs(),
            default_wait_timeout_ms: default_wait_timeout_ms(),
            session_expiry_secs: default_session_expiry_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn question_timeout(&self) -> Duration {
        Duration::from_secs(self.question_timeout_secs)
    }

    #[must_use]
    pub const fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.default_wait_timeout_ms)
    }

    #[must_use]
    pub const fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }

    /// Sweep period, never shorter than one second.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
