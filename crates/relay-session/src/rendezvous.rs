//! The two blocking handshakes: question/answer and instruction wait/send.
//!
//! Each kind has at most one pending instance per session. A newer call
//! supersedes the older one, which resolves immediately with a timeout
//! outcome. Every pending instance owns one timer task; the task checks
//! the slot's token before acting, so a timer that lost the race to an
//! answer or a supersession does nothing.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use relay_core::{
    InstructionOutcome, MessageEntry, MessageKind, QuestionOutcome, RelayError, RelayEvent,
    entry::now_millis,
};
use tokio::{
    sync::oneshot,
    task::AbortHandle,
    time::{Instant, sleep_until},
};

use crate::session::{Pending, Session};

/// Outcome types that have a "nobody answered" value.
pub trait TimeoutOutcome {
    /// The outcome a caller sees on deadline, supersession or teardown.
    fn timed_out() -> Self;
}

impl TimeoutOutcome for QuestionOutcome {
    fn timed_out() -> Self {
        Self::timed_out()
    }
}

impl TimeoutOutcome for InstructionOutcome {
    fn timed_out() -> Self {
        Self::timed_out()
    }
}

/// A started blocking operation.
#[derive(Debug)]
pub enum Rendezvous<T> {
    /// Resolved without blocking.
    Ready(T),
    /// Registered; resolves on answer, deadline, supersession or teardown.
    Pending(oneshot::Receiver<T>),
}

impl<T: TimeoutOutcome> Rendezvous<T> {
    /// Suspend until the operation resolves.
    ///
    /// A slot dropped without being resolved (its session was torn down)
    /// reads as a timeout.
    pub async fn wait(self) -> T {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending(rx) => rx.await.unwrap_or_else(|_| T::timed_out()),
        }
    }
}

/// Spawn the deadline timer for a pending slot.
fn arm_timer(
    session: &Arc<Session>,
    token: u64,
    deadline: Instant,
    on_deadline: fn(&Session, u64),
) -> AbortHandle {
    let session: Weak<Session> = Arc::downgrade(session);
    tokio::spawn(async move {
        sleep_until(deadline).await;
        if let Some(session) = session.upgrade() {
            on_deadline(&session, token);
        }
    })
    .abort_handle()
}

impl Session {
    /// Post a question and register it as the pending one.
    ///
    /// Any question already pending is resolved as timed out first.
    pub fn ask_question(
        self: &Arc<Self>,
        question: &str,
        options: Vec<String>,
    ) -> Rendezvous<QuestionOutcome> {
        let mut state = self.lock();

        if let Some(previous) = state.pending_question.take() {
            tracing::debug!(
                session_id = %self.id(),
                question_id = previous.token,
                "superseding pending question"
            );
            previous.resolve(QuestionOutcome::timed_out());
        }

        let entry = self.record_locked(&mut state, MessageKind::question(question, options));
        let deadline = Instant::now() + self.question_timeout;
        let (tx, rx) = oneshot::channel();
        let timer = arm_timer(self, entry.id, deadline, Self::expire_question);
        state.pending_question = Some(Pending::new(entry.id, deadline, tx, timer));
        self.events.publish(RelayEvent::SessionsChanged);

        tracing::info!(session_id = %self.id(), question_id = entry.id, "question pending");
        Rendezvous::Pending(rx)
    }

    /// Answer the pending question.
    ///
    /// Records the answer as a user entry replying to the question and
    /// returns it.
    ///
    /// # Errors
    /// Returns `NotFound` if no question is pending.
    pub fn respond(&self, answer: &str) -> Result<MessageEntry, RelayError> {
        let mut state = self.lock();

        let pending = state
            .pending_question
            .take()
            .ok_or_else(|| RelayError::NotFound("No pending question".to_owned()))?;
        let question_id = pending.token;
        pending.resolve(QuestionOutcome::answered(answer));

        if let Some(question) = state.store.get_mut(question_id) {
            question.mark_answered(None);
        }
        let reply = self.record_locked(&mut state, MessageKind::user(answer, Some(question_id)));
        self.events.publish(RelayEvent::SessionsChanged);

        tracing::info!(session_id = %self.id(), question_id, "question answered");
        Ok(reply)
    }

    fn expire_question(&self, question_id: u64) {
        let mut state = self.lock();

        let current = state.pending_question.as_ref().map(|p| p.token);
        if current != Some(question_id) {
            return;
        }
        let Some(pending) = state.pending_question.take() else {
            return;
        };

        let updated = state.store.get_mut(question_id).map(|question| {
            question.mark_answered(Some(now_millis()));
            question.clone()
        });
        if let Some(updated) = updated {
            self.publish_entry(&updated);
        }
        self.events.publish(RelayEvent::SessionsChanged);
        pending.resolve(QuestionOutcome::timed_out());

        tracing::info!(session_id = %self.id(), question_id, "question timed out");
    }

    /// Take the oldest queued instruction, or register as the waiter.
    ///
    /// A waiter already registered is resolved as timed out first.
    pub fn wait_for_instruction(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Rendezvous<InstructionOutcome> {
        let mut state = self.lock();

        if let Some(instruction) = state.inbox.pop_front() {
            return Rendezvous::Ready(InstructionOutcome::delivered(instruction));
        }

        if let Some(previous) = state.instruction_waiter.take() {
            tracing::debug!(session_id = %self.id(), "superseding instruction waiter");
            previous.resolve(InstructionOutcome::timed_out());
        }

        let token = state.next_waiter_token;
        state.next_waiter_token += 1;
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let timer = arm_timer(self, token, deadline, Self::expire_waiter);
        state.instruction_waiter = Some(Pending::new(token, deadline, tx, timer));

        tracing::debug!(session_id = %self.id(), ?timeout, "waiting for instruction");
        Rendezvous::Pending(rx)
    }

    /// Record an operator message and deliver or queue it.
    ///
    /// # Errors
    /// Returns `BadRequest` if `message` is empty.
    pub fn send_message(&self, message: &str) -> Result<MessageEntry, RelayError> {
        if message.is_empty() {
            return Err(RelayError::BadRequest("No message".to_owned()));
        }

        let mut state = self.lock();
        let entry = self.record_locked(&mut state, MessageKind::user(message, None));

        if let Some(waiter) = state.instruction_waiter.take() {
            waiter.resolve(InstructionOutcome::delivered(message));
            tracing::info!(session_id = %self.id(), "instruction delivered to waiter");
        } else {
            state.inbox.push_back(message.to_owned());
        }
        Ok(entry)
    }

    /// Take every queued instruction, leaving the inbox empty.
    pub fn drain_inbox(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().inbox).into()
    }

    fn expire_waiter(&self, token: u64) {
        let mut state = self.lock();

        let current = state.instruction_waiter.as_ref().map(|p| p.token);
        if current != Some(token) {
            return;
        }
        if let Some(waiter) = state.instruction_waiter.take() {
            waiter.resolve(InstructionOutcome::timed_out());
            tracing::debug!(session_id = %self.id(), "instruction wait timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_core::EventBus;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    const QUESTION_TIMEOUT: Duration = Duration::from_secs(300);

    fn session() -> Arc<Session> {
        Arc::new(Session::new("s1", 200, QUESTION_TIMEOUT, EventBus::new(64)))
    }

    fn question_id(session: &Session) -> u64 {
        session.snapshot().pending_question_id.unwrap()
    }

    #[tokio::test]
    async fn test_respond_resolves_question() {
        let session = session();
        let mut ask = task::spawn(
            session
                .ask_question("continue?", vec!["yes".into(), "no".into()])
                .wait(),
        );
        assert_pending!(ask.poll());
        let qid = question_id(&session);

        let reply = session.respond("yes").unwrap();

        assert!(ask.is_woken());
        assert_ready_eq!(ask.poll(), QuestionOutcome::answered("yes"));
        assert!(!session.has_pending_question());
        assert_eq!(reply.kind, MessageKind::user("yes", Some(qid)));

        let question = session.message(qid).unwrap();
        assert!(matches!(
            question.kind,
            MessageKind::Question { answered: true, timed_out_at: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_respond_without_question_is_not_found() {
        let session = session();
        assert!(matches!(session.respond("yes"), Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_respond_twice_is_not_found() {
        let session = session();
        let rendezvous = session.ask_question("q", Vec::new());
        session.respond("a").unwrap();
        assert!(matches!(session.respond("b"), Err(RelayError::NotFound(_))));
        assert_eq!(rendezvous.wait().await, QuestionOutcome::answered("a"));
    }

    #[tokio::test]
    async fn test_second_question_supersedes_first() {
        let session = session();
        let mut first = task::spawn(session.ask_question("first?", Vec::new()).wait());
        assert_pending!(first.poll());
        let first_id = question_id(&session);

        let mut second = task::spawn(session.ask_question("second?", Vec::new()).wait());

        assert_ready_eq!(first.poll(), QuestionOutcome::timed_out());
        assert_pending!(second.poll());
        let second_id = question_id(&session);
        assert!(second_id > first_id);

        session.respond("ok").unwrap();
        assert_ready_eq!(second.poll(), QuestionOutcome::answered("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_deadline_marks_entry() {
        let session = session();
        let mut events = session.events.subscribe();
        let started = Instant::now();

        let outcome = session.ask_question("still there?", Vec::new()).wait().await;

        assert_eq!(outcome, QuestionOutcome::timed_out());
        assert!(started.elapsed() >= QUESTION_TIMEOUT);
        assert!(!session.has_pending_question());

        let question = session.message(1).unwrap();
        assert!(matches!(
            question.kind,
            MessageKind::Question { answered: true, timed_out_at: Some(_), .. }
        ));

        // Stored, pending-changed, then the timed-out update.
        let mut updates = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RelayEvent::Message { entry, .. } = event {
                updates.push(entry);
            }
        }
        assert_eq!(updates.len(), 2);
        assert!(updates[0].is_open_question());
        assert!(!updates[1].is_open_question());

        assert!(matches!(session.respond("late"), Err(RelayError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_question_timer_is_ignored() {
        let session = session();
        let first = session.ask_question("first?", Vec::new());
        tokio::time::advance(Duration::from_secs(200)).await;
        let mut second = task::spawn(session.ask_question("second?", Vec::new()).wait());
        assert_eq!(first.wait().await, QuestionOutcome::timed_out());

        // The first question's deadline passes; the second stays pending.
        tokio::time::advance(Duration::from_secs(150)).await;
        tokio::task::yield_now().await;
        assert_pending!(second.poll());
        assert!(session.has_pending_question());
        assert_eq!(question_id(&session), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_deadline_follows_timeout() {
        let session = session();
        let asked_at = Instant::now();
        let _ask = session.ask_question("continue?", Vec::new());
        assert_eq!(session.question_deadline(), Some(asked_at + QUESTION_TIMEOUT));

        session.respond("yes").unwrap();
        assert_eq!(session.question_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_waiter_timer_is_ignored() {
        let session = session();
        let first = session.wait_for_instruction(Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(30)).await;

        let second_at = Instant::now();
        let mut second = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_eq!(first.wait().await, InstructionOutcome::timed_out());
        assert_eq!(
            session.waiter_deadline(),
            Some(second_at + Duration::from_secs(60))
        );

        // The first waiter's deadline passes; the second stays registered.
        tokio::time::advance(Duration::from_secs(40)).await;
        tokio::task::yield_now().await;
        assert_pending!(second.poll());
        assert!(session.has_instruction_waiter());

        session.send_message("carry on").unwrap();
        assert_ready_eq!(second.poll(), InstructionOutcome::delivered("carry on"));
        assert!(session.inbox().is_empty());
        assert_eq!(session.waiter_deadline(), None);
    }

    #[tokio::test]
    async fn test_wait_takes_queued_instruction_first() {
        let session = session();
        session.send_message("one").unwrap();
        session.send_message("two").unwrap();

        let first = session.wait_for_instruction(Duration::from_secs(1));
        assert!(matches!(first, Rendezvous::Ready(_)));
        assert_eq!(first.wait().await, InstructionOutcome::delivered("one"));
        assert!(!session.has_instruction_waiter());

        let second = session.wait_for_instruction(Duration::from_secs(1)).wait().await;
        assert_eq!(second, InstructionOutcome::delivered("two"));
    }

    #[tokio::test]
    async fn test_send_delivers_to_waiter_without_queueing() {
        let session = session();
        let mut wait = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(wait.poll());
        assert!(session.has_instruction_waiter());

        let entry = session.send_message("run the tests").unwrap();

        assert_ready_eq!(wait.poll(), InstructionOutcome::delivered("run the tests"));
        assert_eq!(entry.kind, MessageKind::user("run the tests", None));
        assert!(session.inbox().is_empty());
        assert!(!session.has_instruction_waiter());
    }

    #[tokio::test]
    async fn test_send_without_waiter_queues() {
        let session = session();
        session.send_message("a").unwrap();
        session.send_message("b").unwrap();
        assert_eq!(session.inbox(), vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(session.messages_since(0).len(), 2);

        assert_eq!(session.drain_inbox(), vec!["a".to_owned(), "b".to_owned()]);
        assert!(session.drain_inbox().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let session = session();
        assert!(matches!(session.send_message(""), Err(RelayError::BadRequest(_))));
        assert!(session.messages_since(0).is_empty());
    }

    #[tokio::test]
    async fn test_second_waiter_supersedes_first() {
        let session = session();
        let mut first = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(first.poll());

        let mut second = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_ready_eq!(first.poll(), InstructionOutcome::timed_out());
        assert_pending!(second.poll());

        session.send_message("go").unwrap();
        assert_ready_eq!(second.poll(), InstructionOutcome::delivered("go"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let session = session();
        let started = Instant::now();

        let outcome = session
            .wait_for_instruction(Duration::from_millis(100))
            .wait()
            .await;

        assert_eq!(outcome, InstructionOutcome::timed_out());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!session.has_instruction_waiter());
    }

    #[tokio::test]
    async fn test_drain_leaves_waiter_alone() {
        let session = session();
        let mut wait = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(wait.poll());

        assert!(session.drain_inbox().is_empty());
        assert_pending!(wait.poll());
        assert!(session.has_instruction_waiter());
    }

    #[tokio::test]
    async fn test_respond_does_not_touch_inbox_or_waiter() {
        let session = session();
        session.send_message("queued").unwrap();
        let _question = session.ask_question("q", Vec::new());
        session.respond("a").unwrap();
        assert_eq!(session.inbox(), vec!["queued".to_owned()]);
    }

    #[tokio::test]
    async fn test_close_resolves_everything_once() {
        let session = session();
        let mut ask = task::spawn(session.ask_question("q", Vec::new()).wait());
        let mut wait = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(ask.poll());
        assert_pending!(wait.poll());

        session.close();

        assert_ready_eq!(ask.poll(), QuestionOutcome::timed_out());
        assert_ready_eq!(wait.poll(), InstructionOutcome::timed_out());
        assert!(matches!(session.respond("late"), Err(RelayError::NotFound(_))));
    }
}
