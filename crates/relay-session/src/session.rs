//! Per-session state: history, inbox, status and pending handshakes.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use relay_core::{
    EventBus, InstructionOutcome, Level, MessageEntry, MessageKind, MsgStore, QuestionOutcome,
    RelayEvent, SessionId, SessionMeta, SessionSnapshot, SessionSummary, entry::now_millis,
};
use tokio::{sync::oneshot, task::AbortHandle, time::Instant};

/// A blocked caller waiting on one rendezvous slot.
///
/// Owns the only sender for the caller's outcome and the handle of the
/// deadline timer, so whichever path takes it out of the slot is the one
/// and only path that resolves it.
pub(crate) struct Pending<T> {
    pub(crate) token: u64,
    pub(crate) deadline: Instant,
    tx: oneshot::Sender<T>,
    timer: AbortHandle,
}

impl<T> Pending<T> {
    pub(crate) const fn new(
        token: u64,
        deadline: Instant,
        tx: oneshot::Sender<T>,
        timer: AbortHandle,
    ) -> Self {
        Self {
            token,
            deadline,
            tx,
            timer,
        }
    }

    /// Cancel the deadline timer and hand `outcome` to the blocked caller.
    pub(crate) fn resolve(self, outcome: T) {
        self.timer.abort();
        // The caller may have disconnected; nobody is left to tell.
        let _ = self.tx.send(outcome);
    }
}

pub(crate) struct SessionState {
    pub(crate) store: MsgStore,
    pub(crate) inbox: VecDeque<String>,
    pub(crate) pending_question: Option<Pending<QuestionOutcome>>,
    pub(crate) instruction_waiter: Option<Pending<InstructionOutcome>>,
    pub(crate) next_waiter_token: u64,
    pub(crate) status: String,
    pub(crate) meta: SessionMeta,
    pub(crate) last_activity: Instant,
    pub(crate) last_activity_ms: u64,
}

/// One agent's relay context.
///
/// All mutable state sits behind a single mutex that is never held across
/// an `.await`, so every operation is atomic with respect to the others on
/// the same session.
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
    pub(crate) events: EventBus,
    pub(crate) question_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Session {
    /// Create an empty session publishing to `events`.
    #[must_use]
    pub fn new(
        id: impl Into<SessionId>,
        history_capacity: usize,
        question_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SessionState {
                store: MsgStore::with_capacity(history_capacity),
                inbox: VecDeque::new(),
                pending_question: None,
                instruction_waiter: None,
                next_waiter_token: 1,
                status: String::new(),
                meta: SessionMeta::default(),
                last_activity: Instant::now(),
                last_activity_ms: now_millis(),
            }),
            events,
            question_timeout,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the session as just referenced.
    pub fn touch(&self) {
        let mut state = self.lock();
        state.last_activity = Instant::now();
        state.last_activity_ms = now_millis();
    }

    /// Time since the session was last referenced.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_activity)
    }

    /// Store an entry and broadcast it.
    pub(crate) fn record_locked(&self, state: &mut SessionState, kind: MessageKind) -> MessageEntry {
        let entry = state.store.add(kind);
        self.publish_entry(&entry);
        entry
    }

    pub(crate) fn publish_entry(&self, entry: &MessageEntry) {
        tracing::debug!(session_id = %self.id, id = entry.id, "entry stored");
        self.events.publish(RelayEvent::Message {
            session_id: self.id.clone(),
            entry: entry.clone(),
        });
    }

    /// Store a notification from the agent.
    pub fn notify(&self, message: &str, level: Level) -> MessageEntry {
        let mut state = self.lock();
        self.record_locked(&mut state, MessageKind::notification(message, level))
    }

    /// Store a tool-use report from the agent.
    pub fn record_activity(&self, tool: &str, summary: &str) -> MessageEntry {
        let mut state = self.lock();
        self.record_locked(&mut state, MessageKind::activity(tool, summary))
    }

    /// Replace the status text, store it, and signal the change.
    pub fn set_status(&self, status: &str) -> MessageEntry {
        let mut state = self.lock();
        state.status = status.to_owned();
        let entry = self.record_locked(&mut state, MessageKind::status(status));
        self.events.publish(RelayEvent::SessionStatus {
            session_id: self.id.clone(),
            status: status.to_owned(),
        });
        entry
    }

    /// Merge repository metadata into the session.
    pub fn register_meta(&self, meta: SessionMeta) {
        self.lock().meta.merge(meta);
        self.events.publish(RelayEvent::SessionsChanged);
    }

    /// Current status text.
    #[must_use]
    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    /// Current repository metadata.
    #[must_use]
    pub fn meta(&self) -> SessionMeta {
        self.lock().meta.clone()
    }

    /// Entries with an id greater than `after_id`.
    #[must_use]
    pub fn messages_since(&self, after_id: u64) -> Vec<MessageEntry> {
        self.lock().store.since(after_id)
    }

    /// Retained entry with the given id, if not evicted.
    #[must_use]
    pub fn message(&self, id: u64) -> Option<MessageEntry> {
        self.lock().store.get(id).cloned()
    }

    /// Queued instructions, oldest first, without consuming them.
    #[must_use]
    pub fn inbox(&self) -> Vec<String> {
        self.lock().inbox.iter().cloned().collect()
    }

    /// Whether a question is waiting for an answer.
    #[must_use]
    pub fn has_pending_question(&self) -> bool {
        self.lock().pending_question.is_some()
    }

    /// Deadline of the pending question, if any.
    #[must_use]
    pub fn question_deadline(&self) -> Option<Instant> {
        self.lock().pending_question.as_ref().map(|p| p.deadline)
    }

    /// Whether a caller is blocked waiting for an instruction.
    #[must_use]
    pub fn has_instruction_waiter(&self) -> bool {
        self.lock().instruction_waiter.is_some()
    }

    /// Deadline of the blocked instruction waiter, if any.
    #[must_use]
    pub fn waiter_deadline(&self) -> Option<Instant> {
        self.lock().instruction_waiter.as_ref().map(|p| p.deadline)
    }

    /// Summary row for the session list.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let state = self.lock();
        SessionSummary {
            id: self.id.clone(),
            meta: state.meta.clone(),
            status: state.status.clone(),
            has_pending_question: state.pending_question.is_some(),
            last_activity: state.last_activity_ms,
            message_count: state.store.len(),
        }
    }

    /// Full history plus status for a viewer.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            messages: state.store.all(),
            status: state.status.clone(),
            has_pending_question: state.pending_question.is_some(),
            pending_question_id: state.pending_question.as_ref().map(|p| p.token),
        }
    }

    /// Release every blocked caller with a timeout outcome.
    ///
    /// Called when the session is expired or the registry shuts down.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(waiter) = state.instruction_waiter.take() {
            waiter.resolve(InstructionOutcome::timed_out());
        }
        if let Some(question) = state.pending_question.take() {
            question.resolve(QuestionOutcome::timed_out());
        }
    }
}
