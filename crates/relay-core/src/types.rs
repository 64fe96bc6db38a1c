//! Identifiers, outcomes, summaries and errors shared by the relay crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MessageEntry, SessionMeta};

/// Session identifier, supplied by the caller.
pub type SessionId = String;

/// Session used when a request names none.
pub const DEFAULT_SESSION: &str = "_default";

/// Map an optional, possibly empty id onto the session it refers to.
#[must_use]
pub fn resolve_session_id(id: Option<&str>) -> &str {
    match id {
        Some(id) if !id.is_empty() => id,
        _ => DEFAULT_SESSION,
    }
}

/// How a question handshake ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub answer: Option<String>,
    pub timed_out: bool,
}

impl QuestionOutcome {
    /// The operator answered.
    pub fn answered(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            timed_out: false,
        }
    }

    /// Deadline elapsed, superseded, or the session went away.
    #[must_use]
    pub const fn timed_out() -> Self {
        Self {
            answer: None,
            timed_out: true,
        }
    }
}

/// How an instruction wait ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionOutcome {
    pub instruction: Option<String>,
    pub timed_out: bool,
}

impl InstructionOutcome {
    /// An instruction was delivered.
    pub fn delivered(instruction: impl Into<String>) -> Self {
        Self {
            instruction: Some(instruction.into()),
            timed_out: false,
        }
    }

    /// Deadline elapsed, superseded, or the session went away.
    #[must_use]
    pub const fn timed_out() -> Self {
        Self {
            instruction: None,
            timed_out: true,
        }
    }
}

/// One row of the session list shown to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub meta: SessionMeta,
    pub status: String,
    pub has_pending_question: bool,
    /// Last time the session was referenced (ms since epoch).
    pub last_activity: u64,
    pub message_count: usize,
}

/// Everything a viewer needs to render one session from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub messages: Vec<MessageEntry>,
    pub status: String,
    pub has_pending_question: bool,
    pub pending_question_id: Option<u64>,
}

/// Relay error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}
