//! The inbound message queue shared between connection handlers and the tick
//! loop.
//!
//! Any number of handlers push onto the back while the tick loop is the only
//! consumer. The queue is unbounded, so a slow machine accumulates a backlog
//! rather than pushing back on its peers.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

/// A FIFO of logical timestamps received from other machines.
///
/// Cloning gives another handle onto the same queue.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    queue: Arc<Mutex<VecDeque<u64>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a received timestamp.
    pub fn push(&self, timestamp: u64) {
        self.lock().push_back(timestamp);
    }

    /// Removes the oldest timestamp. Returns it together with the number of
    /// messages still waiting, both read under the same lock.
    pub fn pop(&self) -> Option<(u64, usize)> {
        let mut queue = self.lock();
        let timestamp = queue.pop_front()?;
        Some((timestamp, queue.len()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Pushes and pops never leave the deque half-updated, so a poisoned lock
    // still guards a consistent queue.
    fn lock(&self) -> MutexGuard<'_, VecDeque<u64>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
