//! Best-effort broadcast of relay events to connected viewers.

use std::{future::Future, sync::Arc};

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{MessageEntry, SessionId};

/// Default buffer size of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something viewers should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A new entry was stored, or an existing one changed.
    Message {
        session_id: SessionId,
        entry: MessageEntry,
    },
    /// Session membership, metadata or pending-question flags changed.
    SessionsChanged,
    /// A session's status text changed.
    SessionStatus { session_id: SessionId, status: String },
}

/// Process-wide broadcast channel for [`RelayEvent`]s.
///
/// Publishing never fails: with no subscribers the event is dropped,
/// and slow subscribers skip what they lagged behind on. Once the bus is
/// closed, every stream from [`EventBus::stream`] ends.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
    closed: Arc<watch::Sender<bool>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            sender,
            closed: Arc::new(closed),
        }
    }

    /// End all live streams. Publishing still works but nobody streams it.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether [`EventBus::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the bus is closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut rx = self.closed.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Publish an event to every live subscriber.
    pub fn publish(&self, event: RelayEvent) {
        let _ = self.sender.send(event);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Live events as a stream, skipping over lag gaps. Ends when the bus
    /// is closed.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, RelayEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged");
                        None
                    }
                }
            })
            .take_until(self.closed())
            .boxed()
    }
}
