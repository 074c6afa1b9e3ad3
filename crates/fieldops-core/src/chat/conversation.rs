//! Reconciled message sequence for one topic
//!
//! A [`Conversation`] merges two sources into one ordered, duplicate-free
//! sequence: optimistic echoes of messages the current user sends, and
//! committed messages arriving from the store or the realtime stream.
//!
//! Rules:
//!
//! - at most one entry per server id, whatever order confirmations and
//!   stream events arrive in
//! - a confirmation replaces its echo in place (matched by local id)
//! - an own message seen on the stream while an echo with the same body is
//!   still pending is held back until that echo resolves
//! - confirmed entries are kept in server timestamp order relative to their
//!   confirmed neighbours; echoes stay where they were typed

use tracing::{debug, warn};

use super::message::{DeliveryState, Message};
use crate::types::{Identity, LocalId, MessageId, TopicId};

/// What `apply_remote` did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// New entry at the end of the sequence
    Appended,
    /// Id already present (redelivery or already reconciled)
    Duplicate,
    /// Own message waiting for its pending echo to resolve
    Held,
    /// Message without a server id; dropped
    Invalid,
}

/// The message sequence of one conversation topic.
///
/// # Example
///
/// ```ignore
/// let mut convo = Conversation::new(topic.clone(), me.clone());
///
/// let local_id = LocalId::new();
/// convo.push_pending(local_id, "On my way");
/// // ... store commits the row as msg-17 ...
/// convo.confirm(local_id, committed);
///
/// // The same row arriving on the realtime stream is dropped
/// assert_eq!(convo.apply_remote(committed_again), RemoteOutcome::Duplicate);
/// ```
#[derive(Debug, Clone)]
pub struct Conversation {
    pub topic: TopicId,
    self_id: Identity,
    /// Entries in display order
    messages: Vec<Message>,
    /// Own stream messages held back while a same-body echo is pending
    held: Vec<Message>,
    /// Last message timestamp (for sorting conversations)
    pub last_activity: i64,
}

impl Conversation {
    /// Create a new empty conversation viewed by `self_id`.
    pub fn new(topic: TopicId, self_id: Identity) -> Self {
        Self {
            topic,
            self_id,
            messages: Vec::new(),
            held: Vec::new(),
            last_activity: 0,
        }
    }

    pub fn self_id(&self) -> &Identity {
        &self.self_id
    }

    /// Get all entries in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of own stream messages currently held back
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id.as_ref() == Some(id))
    }

    pub fn get_by_local(&self, local_id: LocalId) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.local_id == Some(local_id))
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Get a preview of the conversation (last message body truncated).
    ///
    /// Truncates on character boundaries.
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        self.last_message().map(|m| {
            if m.body.chars().count() > max_chars {
                let cut: String = m.body.chars().take(max_chars).collect();
                format!("{}...", cut)
            } else {
                m.body.clone()
            }
        })
    }

    /// Messages from others not yet read
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.is_from(&self.self_id) && m.read_at.is_none())
            .count()
    }

    /// Stamp every unread message from others as read at `at`.
    ///
    /// Returns how many entries changed.
    pub fn mark_read(&mut self, at: i64) -> usize {
        let mut marked = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id != self.self_id && m.read_at.is_none())
        {
            message.read_at = Some(at);
            marked += 1;
        }
        marked
    }

    /// Append the optimistic echo of an outgoing message.
    pub fn push_pending(&mut self, local_id: LocalId, body: impl Into<String>) -> &Message {
        let message = Message::pending(local_id, self.topic.clone(), self.self_id.clone(), body);
        self.touch(message.created_at);
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Merge the store's recent history (oldest first).
    ///
    /// Entries already present are skipped; the rest are placed by timestamp
    /// so history loaded after live events still lands in front of them.
    pub fn load_history(&mut self, history: Vec<Message>) -> usize {
        let mut added = 0;
        for message in history {
            let Some(id) = message.id.as_ref() else {
                continue;
            };
            if self.contains_id(id) || self.is_held(id) {
                continue;
            }
            let message = Self::committed(message);
            let pos = self
                .messages
                .iter()
                .position(|m| m.created_at > message.created_at)
                .unwrap_or(self.messages.len());
            self.touch(message.created_at);
            self.messages.insert(pos, message);
            added += 1;
        }
        added
    }

    /// Apply one message from the realtime stream.
    pub fn apply_remote(&mut self, message: Message) -> RemoteOutcome {
        let Some(id) = message.id.clone() else {
            warn!(topic = %self.topic, "Dropping stream message without server id");
            return RemoteOutcome::Invalid;
        };

        if self.contains_id(&id) || self.is_held(&id) {
            debug!(topic = %self.topic, %id, "Duplicate delivery dropped");
            return RemoteOutcome::Duplicate;
        }

        let message = Self::committed(message);
        if message.is_from(&self.self_id) && self.has_pending_body(&message.body) {
            debug!(topic = %self.topic, %id, "Own message held until its echo resolves");
            self.held.push(message);
            return RemoteOutcome::Held;
        }

        self.insert_committed(message);
        RemoteOutcome::Appended
    }

    /// Reconcile the store's confirmation of an outgoing message.
    ///
    /// Replaces the echo keyed by `local_id` in place and returns true. If the
    /// echo is gone the confirmed row is appended unless already present, and
    /// false is returned.
    pub fn confirm(&mut self, local_id: LocalId, confirmed: Message) -> bool {
        let Some(id) = confirmed.id.clone() else {
            warn!(topic = %self.topic, %local_id, "Confirmation without server id ignored");
            return false;
        };
        self.held.retain(|m| m.id.as_ref() != Some(&id));

        let Some(idx) = self.position_of_local(local_id) else {
            if !self.contains_id(&id) {
                self.insert_committed(Self::committed(confirmed));
            }
            self.release_held();
            return false;
        };

        if let Some(existing) = self
            .messages
            .iter()
            .position(|m| m.id.as_ref() == Some(&id))
        {
            if existing != idx {
                // The row is already shown; the echo would be a second copy.
                self.messages.remove(idx);
                let existing = if existing > idx { existing - 1 } else { existing };
                self.messages[existing].local_id = Some(local_id);
                self.release_held();
                return true;
            }
        }

        let read_at = self.messages[idx].read_at;
        let mut message = Self::committed(confirmed);
        message.local_id = Some(local_id);
        message.read_at = read_at;
        self.touch(message.created_at);
        self.messages[idx] = message;
        self.settle(idx);
        self.release_held();
        true
    }

    /// Mark a pending echo as failed. Returns its body for the composer.
    pub fn fail(&mut self, local_id: LocalId) -> Option<String> {
        let idx = self.position_of_local(local_id)?;
        let message = &mut self.messages[idx];
        if message.delivery != DeliveryState::Pending {
            return None;
        }
        message.delivery = DeliveryState::Failed;
        let body = message.body.clone();
        self.release_held();
        Some(body)
    }

    /// Flip a failed echo back to pending for a resend. Returns its body.
    pub fn retry(&mut self, local_id: LocalId) -> Option<String> {
        let idx = self.position_of_local(local_id)?;
        let message = &mut self.messages[idx];
        if message.delivery != DeliveryState::Failed {
            return None;
        }
        message.delivery = DeliveryState::Pending;
        Some(message.body.clone())
    }

    /// Remove a failed echo.
    pub fn discard(&mut self, local_id: LocalId) -> Option<Message> {
        let idx = self.position_of_local(local_id)?;
        if !self.messages[idx].is_failed() {
            return None;
        }
        Some(self.messages.remove(idx))
    }

    fn committed(mut message: Message) -> Message {
        message.delivery = DeliveryState::Confirmed;
        message
    }

    fn touch(&mut self, timestamp: i64) {
        if timestamp > self.last_activity {
            self.last_activity = timestamp;
        }
    }

    fn position_of_local(&self, local_id: LocalId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.local_id == Some(local_id))
    }

    fn is_held(&self, id: &MessageId) -> bool {
        self.held.iter().any(|m| m.id.as_ref() == Some(id))
    }

    fn has_pending_body(&self, body: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.is_pending() && m.is_from(&self.self_id) && m.body == body)
    }

    /// Append held messages whose pending counterpart no longer exists.
    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let held = std::mem::take(&mut self.held);
        for message in held {
            if self.has_pending_body(&message.body) {
                self.held.push(message);
                continue;
            }
            let id = message.id.clone();
            if id.as_ref().is_some_and(|id| self.contains_id(id)) {
                continue;
            }
            self.insert_committed(message);
        }
    }

    /// Append a committed row, stepping back over trailing confirmed entries
    /// with a later server timestamp. Pending and failed echoes stay put.
    fn insert_committed(&mut self, message: Message) {
        let mut pos = self.messages.len();
        while pos > 0
            && self.messages[pos - 1].is_confirmed()
            && self.messages[pos - 1].created_at > message.created_at
        {
            pos -= 1;
        }
        self.touch(message.created_at);
        self.messages.insert(pos, message);
    }

    /// Move a freshly confirmed entry past adjacent confirmed entries whose
    /// server timestamps say they were committed on the other side of it.
    fn settle(&mut self, mut idx: usize) {
        while idx > 0
            && self.messages[idx - 1].is_confirmed()
            && self.messages[idx - 1].created_at > self.messages[idx].created_at
        {
            self.messages.swap(idx - 1, idx);
            idx -= 1;
        }
        while idx + 1 < self.messages.len()
            && self.messages[idx + 1].is_confirmed()
            && self.messages[idx + 1].created_at < self.messages[idx].created_at
        {
            self.messages.swap(idx, idx + 1);
            idx += 1;
        }
    }
}
