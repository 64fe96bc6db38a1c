//! Bounded message history with stable, increasing ids.

use std::collections::VecDeque;

use crate::entry::{MessageEntry, MessageKind, now_millis};

/// Default number of entries retained per session.
pub const DEFAULT_CAPACITY: usize = 200;

/// Ring buffer of history entries.
///
/// Essential for reconnection: a client that saw id `n` asks for
/// everything after `n`. Eviction drops the oldest entries but never
/// resets the id counter, so ids stay unique for the life of the store.
#[derive(Debug)]
pub struct MsgStore {
    history: VecDeque<MessageEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    /// Create a store holding up to [`DEFAULT_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store holding up to `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity.min(32)),
            capacity,
            next_id: 1,
        }
    }

    /// Stamp and append an entry, evicting the oldest one if full.
    ///
    /// Returns a copy of the stored entry.
    pub fn add(&mut self, kind: MessageKind) -> MessageEntry {
        let entry = MessageEntry {
            id: self.next_id,
            ts: now_millis(),
            kind,
        };
        self.next_id += 1;

        self.history.push_back(entry.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        entry
    }

    /// Entries with `id > after_id`, oldest first.
    #[must_use]
    pub fn since(&self, after_id: u64) -> Vec<MessageEntry> {
        let start = self.history.partition_point(|e| e.id <= after_id);
        self.history.range(start..).cloned().collect()
    }

    /// Snapshot of the whole buffer, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<MessageEntry> {
        self.history.iter().cloned().collect()
    }

    /// Look up a retained entry by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&MessageEntry> {
        let idx = self.history.binary_search_by_key(&id, |e| e.id).ok()?;
        self.history.get(idx)
    }

    /// Mutable access to a retained entry; `None` once it has been evicted.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut MessageEntry> {
        let idx = self.history.binary_search_by_key(&id, |e| e.id).ok()?;
        self.history.get_mut(idx)
    }

    /// Id the next `add` will assign.
    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
