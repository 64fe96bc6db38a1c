//! Front door for every relay operation, keyed by session id.

use std::{sync::Arc, time::Duration};

use relay_core::{
    InstructionOutcome, Level, MessageEntry, QuestionOutcome, RelayConfig, RelayError, SessionId,
    SessionMeta, SessionSnapshot, SessionSummary,
};

use crate::SessionRegistry;

/// Maps the relay's operations onto sessions of a shared registry.
///
/// Every call references its session through
/// [`SessionRegistry::get_or_create`], which counts as activity for
/// expiry purposes. Only `ask_question` and `wait_for_instruction`
/// suspend their caller.
#[derive(Clone)]
pub struct RendezvousCoordinator {
    registry: Arc<SessionRegistry>,
}

impl RendezvousCoordinator {
    /// Create a coordinator over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Registry configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        self.registry.config()
    }

    /// Store and broadcast a notification. Returns the entry id.
    pub async fn notify(&self, session: &str, message: &str, level: Level) -> u64 {
        self.registry
            .get_or_create(session)
            .await
            .notify(message, level)
            .id
    }

    /// Store and broadcast a tool-use report. Returns the entry id.
    pub async fn record_activity(&self, session: &str, tool: &str, summary: &str) -> u64 {
        self.registry
            .get_or_create(session)
            .await
            .record_activity(tool, summary)
            .id
    }

    /// Replace the session's status text.
    pub async fn set_status(&self, session: &str, status: &str) -> MessageEntry {
        self.registry.get_or_create(session).await.set_status(status)
    }

    /// Ask the operator a question and block until answered or timed out.
    pub async fn ask_question(
        &self,
        session: &str,
        question: &str,
        options: Vec<String>,
    ) -> QuestionOutcome {
        let session = self.registry.get_or_create(session).await;
        let outcome = session.ask_question(question, options).wait().await;
        tracing::debug!(
            session_id = %session.id(),
            timed_out = outcome.timed_out,
            "ask_question resolved"
        );
        outcome
    }

    /// Answer the session's pending question.
    ///
    /// # Errors
    /// Returns `NotFound` if no question is pending.
    pub async fn respond(&self, session: &str, answer: &str) -> Result<(), RelayError> {
        self.registry
            .get_or_create(session)
            .await
            .respond(answer)
            .map(|_| ())
    }

    /// Take every queued instruction.
    pub async fn drain_inbox(&self, session: &str) -> Vec<String> {
        self.registry.get_or_create(session).await.drain_inbox()
    }

    /// Block until an instruction arrives or `timeout` elapses.
    ///
    /// `None` uses the configured default wait.
    pub async fn wait_for_instruction(
        &self,
        session: &str,
        timeout: Option<Duration>,
    ) -> InstructionOutcome {
        let timeout = timeout.unwrap_or_else(|| self.config().default_wait_timeout());
        let session = self.registry.get_or_create(session).await;
        let outcome = session.wait_for_instruction(timeout).wait().await;
        tracing::debug!(
            session_id = %session.id(),
            timed_out = outcome.timed_out,
            "wait_for_instruction resolved"
        );
        outcome
    }

    /// Record an operator message and deliver or queue it. Returns the entry id.
    ///
    /// # Errors
    /// Returns `BadRequest` if `message` is empty.
    pub async fn send_message(&self, session: &str, message: &str) -> Result<u64, RelayError> {
        self.registry
            .get_or_create(session)
            .await
            .send_message(message)
            .map(|entry| entry.id)
    }

    /// Merge repository metadata into the session. Returns its id.
    pub async fn register_session_meta(&self, session: &str, meta: SessionMeta) -> SessionId {
        let session = self.registry.get_or_create(session).await;
        session.register_meta(meta);
        session.id().to_owned()
    }

    /// Summaries of every live session.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry.list().await
    }

    /// Full history, status and pending-question state of a session.
    pub async fn get_state(&self, session: &str) -> SessionSnapshot {
        self.registry.get_or_create(session).await.snapshot()
    }

    /// Entries newer than `after_id`, for reconnecting viewers.
    pub async fn messages_since(&self, session: &str, after_id: u64) -> Vec<MessageEntry> {
        self.registry
            .get_or_create(session)
            .await
            .messages_since(after_id)
    }
}
