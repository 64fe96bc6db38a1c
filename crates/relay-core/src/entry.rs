//! Typed entries kept in a session's message history.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// Type-specific payload of a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MessageKind {
    /// A tool invocation reported by the agent.
    Activity {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        summary: String,
    },
    /// Free-form progress or result message from the agent.
    Notification {
        message: String,
        #[serde(default)]
        level: Level,
    },
    /// A question the agent is blocked on.
    Question {
        question: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        answered: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timed_out_at: Option<u64>,
    },
    /// Status line update.
    Status { status: String },
    /// Something the operator typed.
    User {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_reply_to: Option<u64>,
    },
}

impl MessageKind {
    /// Build an activity payload.
    pub fn activity(tool: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::Activity {
            tool: tool.into(),
            summary: summary.into(),
        }
    }

    /// Build a notification payload.
    pub fn notification(message: impl Into<String>, level: Level) -> Self {
        Self::Notification {
            message: message.into(),
            level,
        }
    }

    /// Build an unanswered question payload.
    pub fn question(question: impl Into<String>, options: Vec<String>) -> Self {
        Self::Question {
            question: question.into(),
            options,
            answered: false,
            timed_out_at: None,
        }
    }

    /// Build a status payload.
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status {
            status: status.into(),
        }
    }

    /// Build an operator message, optionally replying to a question.
    pub fn user(message: impl Into<String>, in_reply_to: Option<u64>) -> Self {
        Self::User {
            message: message.into(),
            in_reply_to,
        }
    }
}

/// A stored history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// Per-session id, strictly increasing and never reused.
    pub id: u64,
    /// Time the entry was stored (ms since epoch).
    pub ts: u64,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl MessageEntry {
    /// Whether this entry is a question still waiting for an answer.
    #[must_use]
    pub const fn is_open_question(&self) -> bool {
        matches!(self.kind, MessageKind::Question { answered: false, .. })
    }

    /// Whether this entry is a question that expired without an answer.
    #[must_use]
    pub const fn is_timed_out_question(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Question {
                timed_out_at: Some(_),
                ..
            }
        )
    }

    /// Mark a question entry as answered, recording when it timed out if it did.
    ///
    /// Returns `false` if the entry is not a question.
    pub fn mark_answered(&mut self, timed_out_at: Option<u64>) -> bool {
        match &mut self.kind {
            MessageKind::Question {
                answered,
                timed_out_at: at,
                ..
            } => {
                *answered = true;
                if timed_out_at.is_some() {
                    *at = timed_out_at;
                }
                true
            }
            _ => false,
        }
    }
}
