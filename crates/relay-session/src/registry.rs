//! Session registry with lazy creation and idle expiry.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use relay_core::{
    EventBus, RelayConfig, RelayEvent, SessionId, SessionSummary, resolve_session_id,
};
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};

use crate::Session;

/// Owns every live session.
///
/// Sessions are created on first reference and removed only by the
/// expiry sweep or [`SessionRegistry::shutdown`].
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    events: EventBus,
    config: RelayConfig,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events: EventBus::new(config.event_capacity),
            config,
        }
    }

    /// Registry configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Event bus every session publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Get a session, creating it if needed, and mark it active.
    ///
    /// An empty id refers to the default session.
    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        let id = resolve_session_id(Some(id));

        if let Some(session) = self.sessions.read().await.get(id) {
            session.touch();
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            session.touch();
            return Arc::clone(session);
        }

        let session = Arc::new(Session::new(
            id,
            self.config.history_capacity,
            self.config.question_timeout(),
            self.events.clone(),
        ));
        sessions.insert(id.to_owned(), Arc::clone(&session));
        drop(sessions);

        tracing::info!(session_id = %id, "session created");
        self.events.publish(RelayEvent::SessionsChanged);
        session
    }

    /// Look up a session without creating or touching it.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Summaries of every live session, most recently active first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut result: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.summary())
            .collect();

        result.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    /// Remove sessions idle for longer than the expiry threshold.
    ///
    /// Blocked callers on an expired session are released with timeout
    /// outcomes. Returns the ids that were removed.
    pub async fn sweep_expired(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let expiry = self.config.session_expiry();

        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for(now) > expiry)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        if expired.is_empty() {
            return Vec::new();
        }

        let ids = expired
            .iter()
            .map(|session| {
                session.close();
                tracing::info!(session_id = %session.id(), "session expired");
                session.id().to_owned()
            })
            .collect();
        self.events.publish(RelayEvent::SessionsChanged);
        ids
    }

    /// Run [`Self::sweep_expired`] every sweep interval.
    ///
    /// The task stops on its own once the registry is dropped.
    #[must_use]
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let expired = registry.sweep_expired().await;
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "expiry sweep removed sessions");
                }
            }
        })
    }

    /// Release every blocked caller and forget all sessions.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        for session in &sessions {
            session.close();
        }
        tracing::info!(count = sessions.len(), "session registry shut down");
        self.events.publish(RelayEvent::SessionsChanged);
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{DEFAULT_SESSION, InstructionOutcome, QuestionOutcome};
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    fn short_expiry() -> RelayConfig {
        RelayConfig {
            session_expiry_secs: 60,
            sweep_interval_secs: 30,
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = SessionRegistry::default();
        let a = registry.get_or_create("s1").await;
        let b = registry.get_or_create("s1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_id_maps_to_default() {
        let registry = SessionRegistry::default();
        let session = registry.get_or_create("").await;
        assert_eq!(session.id(), DEFAULT_SESSION);
        assert!(registry.get(DEFAULT_SESSION).await.is_some());
    }

    #[tokio::test]
    async fn test_creation_signals_list_change() {
        let registry = SessionRegistry::default();
        let mut rx = registry.events().subscribe();
        registry.get_or_create("s1").await;
        registry.get_or_create("s1").await;
        assert_eq!(rx.try_recv().ok(), Some(RelayEvent::SessionsChanged));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_list_reports_counts_and_pending_flag() {
        let registry = SessionRegistry::default();
        let s1 = registry.get_or_create("s1").await;
        s1.notify("hello", relay_core::Level::Info);
        let _question = s1.ask_question("ready?", Vec::new());
        registry.get_or_create("s2").await;

        let list = registry.list().await;
        assert_eq!(list.len(), 2);
        let row = list.iter().find(|s| s.id == "s1").unwrap();
        assert_eq!(row.message_count, 2);
        assert!(row.has_pending_question);
        assert!(!list.iter().find(|s| s.id == "s2").unwrap().has_pending_question);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_idle_sessions_only() {
        let registry = SessionRegistry::new(short_expiry());
        registry.get_or_create("idle").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        registry.get_or_create("busy").await;
        tokio::time::advance(Duration::from_secs(20)).await;

        let expired = registry.sweep_expired().await;

        assert_eq!(expired, vec!["idle".to_owned()]);
        assert!(registry.get("idle").await.is_none());
        assert!(registry.get("busy").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_referencing_a_session_keeps_it_alive() {
        let registry = SessionRegistry::new(short_expiry());
        registry.get_or_create("s1").await;
        tokio::time::advance(Duration::from_secs(50)).await;
        registry.get_or_create("s1").await;
        tokio::time::advance(Duration::from_secs(50)).await;

        assert!(registry.sweep_expired().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_resolves_pending_operations() {
        let registry = SessionRegistry::new(RelayConfig {
            session_expiry_secs: 1,
            ..RelayConfig::default()
        });
        let session = registry.get_or_create("s1").await;
        let mut ask = task::spawn(session.ask_question("q", Vec::new()).wait());
        let mut wait = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(ask.poll());
        assert_pending!(wait.poll());

        tokio::time::advance(Duration::from_secs(2)).await;
        let mut rx = registry.events().subscribe();
        assert_eq!(registry.sweep_expired().await, vec!["s1".to_owned()]);

        assert_ready_eq!(ask.poll(), QuestionOutcome::timed_out());
        assert_ready_eq!(wait.poll(), InstructionOutcome::timed_out());
        assert_eq!(rx.try_recv().ok(), Some(RelayEvent::SessionsChanged));
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_on_interval() {
        let registry = Arc::new(SessionRegistry::new(short_expiry()));
        registry.get_or_create("s1").await;
        let sweeper = registry.spawn_expiry_sweeper();

        // Ticks at 30s and 60s find it still fresh; 90s removes it.
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(registry.get("s1").await.is_none());

        sweeper.abort();
    }

    #[tokio::test]
    async fn test_shutdown_releases_callers() {
        let registry = SessionRegistry::default();
        let session = registry.get_or_create("s1").await;
        let mut wait = task::spawn(session.wait_for_instruction(Duration::from_secs(60)).wait());
        assert_pending!(wait.poll());

        registry.shutdown().await;

        assert_ready_eq!(wait.poll(), InstructionOutcome::timed_out());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_ends_event_streams() {
        use futures::StreamExt;

        let registry = SessionRegistry::default();
        let mut events = registry.events().stream();

        registry.shutdown().await;

        assert!(registry.events().is_closed());
        assert_eq!(events.next().await, None);
    }
}
