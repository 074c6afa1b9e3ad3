//! Active-interrupt bookkeeping.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  InterruptQueue                                                 │
//! │  ├── active: Option<InterruptEvent>                             │
//! │  │   └── The event currently blocking interaction               │
//! │  ├── pending: VecDeque<InterruptEvent>                          │
//! │  │   └── Arrived while another was active, FIFO                 │
//! │  └── acknowledged: VecDeque<InterruptId> + HashSet              │
//! │      └── Bounded memory of handled ids (oldest evicted)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashSet, VecDeque};

use super::event::{InterruptEvent, InterruptId};

/// What `receive` did with an incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Became the active interrupt
    Activated,
    /// Another interrupt is active; queued behind it
    Queued,
    /// Already active, queued or acknowledged
    Redelivered,
}

/// Single-active interrupt state with a FIFO backlog.
///
/// Pure data; [`InterruptChannel`](super::InterruptChannel) drives it from
/// the transport and publishes the active slot.
///
/// # Example
///
/// ```ignore
/// let mut queue = InterruptQueue::new(1024);
/// queue.receive(e1);                      // Activated
/// queue.receive(e2);                      // Queued
/// let done = queue.acknowledge(&e1_id);   // e2 becomes active
/// ```
#[derive(Debug, Clone)]
pub struct InterruptQueue {
    active: Option<InterruptEvent>,
    pending: VecDeque<InterruptEvent>,
    acknowledged: VecDeque<InterruptId>,
    acknowledged_set: HashSet<InterruptId>,
    remembered: usize,
}

impl InterruptQueue {
    /// Create a queue that remembers up to `remembered` acknowledged ids.
    pub fn new(remembered: usize) -> Self {
        Self {
            active: None,
            pending: VecDeque::new(),
            acknowledged: VecDeque::new(),
            acknowledged_set: HashSet::new(),
            remembered: remembered.max(1),
        }
    }

    pub fn active(&self) -> Option<&InterruptEvent> {
        self.active.as_ref()
    }

    pub fn is_blocking(&self) -> bool {
        self.active.is_some()
    }

    /// Events waiting behind the active one, oldest first
    pub fn queued(&self) -> Vec<InterruptEvent> {
        self.pending.iter().cloned().collect()
    }

    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is active, queued or remembered as acknowledged
    pub fn has_seen(&self, id: &InterruptId) -> bool {
        self.acknowledged_set.contains(id)
            || self.active.as_ref().is_some_and(|e| &e.id == id)
            || self.pending.iter().any(|e| &e.id == id)
    }

    /// Take in an event from the transport.
    pub fn receive(&mut self, mut event: InterruptEvent) -> Receipt {
        if self.has_seen(&event.id) {
            return Receipt::Redelivered;
        }
        event.acknowledged = false;

        if self.active.is_none() {
            self.active = Some(event);
            Receipt::Activated
        } else {
            self.pending.push_back(event);
            Receipt::Queued
        }
    }

    /// Acknowledge the active event.
    ///
    /// Returns the acknowledged event if `id` was active, promoting the next
    /// queued event. Any other id leaves the queue untouched.
    pub fn acknowledge(&mut self, id: &InterruptId) -> Option<InterruptEvent> {
        if self.active.as_ref().map(|e| &e.id) != Some(id) {
            return None;
        }
        let mut done = self.active.take()?;
        done.acknowledged = true;
        self.remember(done.id.clone());
        self.active = self.pending.pop_front();
        Some(done)
    }

    /// Drop the active event and backlog; acknowledged ids are kept.
    pub fn clear(&mut self) {
        self.active = None;
        self.pending.clear();
    }

    fn remember(&mut self, id: InterruptId) {
        // Evict oldest if at capacity
        if self.acknowledged.len() >= self.remembered {
            if let Some(evicted) = self.acknowledged.pop_front() {
                self.acknowledged_set.remove(&evicted);
            }
        }
        self.acknowledged_set.insert(id.clone());
        self.acknowledged.push_back(id);
    }
}
