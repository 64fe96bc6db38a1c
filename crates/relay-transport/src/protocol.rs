//! Wire protocol between the relay, agents and viewers.

use relay_core::{
    Level, MessageEntry, QuestionOutcome, RelayEvent, SessionId, SessionSummary,
};
use relay_session::RendezvousCoordinator;
use serde::{Deserialize, Serialize};

/// Answer handed to the agent when nobody replied in time.
pub const NO_RESPONSE_ANSWER: &str =
    "No response received within 5 minutes. Proceed with your best judgment.";

/// `session` query parameter accepted by every per-session route.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session: Option<String>,
}

impl SessionQuery {
    /// Requested session id; empty means the default session.
    #[must_use]
    pub fn id(&self) -> &str {
        self.session.as_deref().unwrap_or_default()
    }
}

/// Query of `GET /api/wait-for-instruction`.
#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    pub session: Option<String>,
    /// Deadline in milliseconds.
    pub timeout: Option<u64>,
}

/// Query of `GET /api/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub session: Option<String>,
    #[serde(default)]
    pub after: u64,
}

/// Body of `POST /api/activity`.
#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub summary: String,
}

/// Body of `POST /api/message`.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub level: Option<Level>,
}

/// Body of `POST /api/ask`.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Body of `POST /api/status`.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `POST /api/respond`.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    #[serde(default)]
    pub answer: String,
}

/// Body of `POST /api/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub message: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Ack {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            ok: true,
            id: None,
            session_id: None,
        }
    }

    #[must_use]
    pub const fn with_id(id: u64) -> Self {
        Self {
            ok: true,
            id: Some(id),
            session_id: None,
        }
    }

    #[must_use]
    pub const fn with_session(session_id: SessionId) -> Self {
        Self {
            ok: true,
            id: None,
            session_id: Some(session_id),
        }
    }
}

/// Response of `POST /api/ask`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    pub timed_out: bool,
}

impl From<QuestionOutcome> for AskResponse {
    fn from(outcome: QuestionOutcome) -> Self {
        match outcome.answer {
            Some(answer) if !outcome.timed_out => Self {
                answer,
                timed_out: false,
            },
            _ => Self {
                answer: NO_RESPONSE_ANSWER.to_owned(),
                timed_out: true,
            },
        }
    }
}

/// `{sessions}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsBody {
    pub sessions: Vec<SessionSummary>,
}

/// `{messages}` body of `GET /api/inbox`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxBody {
    pub messages: Vec<String>,
}

/// `{messages}` body of `GET /api/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesBody {
    pub messages: Vec<MessageEntry>,
}

/// Message from a viewer to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ping for keepalive.
    Ping,
}

/// Event pushed from the server to viewers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent once on connect.
    Init { sessions: Vec<SessionSummary> },
    /// A new or updated history entry.
    Message {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(flatten)]
        entry: MessageEntry,
        /// Set when this is a question that just expired.
        #[serde(rename = "timedOut", skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
    },
    /// The session list changed.
    SessionsChanged { sessions: Vec<SessionSummary> },
    /// A session's status text changed.
    SessionStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        status: String,
    },
    /// Pong response.
    Pong,
    /// Error message.
    Error { message: String },
}

impl ServerEvent {
    /// Event name used for SSE framing.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Message { .. } => "message",
            Self::SessionsChanged { .. } => "sessions-changed",
            Self::SessionStatus { .. } => "session-status",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Render a relay event for viewers, re-listing sessions when needed.
    pub async fn from_relay(relay: &RendezvousCoordinator, event: RelayEvent) -> Self {
        match event {
            RelayEvent::Message { session_id, entry } => Self::Message {
                session_id,
                timed_out: entry.is_timed_out_question(),
                entry,
            },
            RelayEvent::SessionsChanged => Self::SessionsChanged {
                sessions: relay.list_sessions().await,
            },
            RelayEvent::SessionStatus { session_id, status } => {
                Self::SessionStatus { session_id, status }
            }
        }
    }
}
