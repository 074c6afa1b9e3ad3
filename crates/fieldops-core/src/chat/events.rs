//! Chat event types and stream status tracking
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TopicStatus: state of the open topic's realtime stream         │
//! │  ├── Closed: No topic open                                      │
//! │  ├── Live: Subscribed, events flowing                           │
//! │  └── Lost: Stream ended without being closed locally            │
//! │                                                                 │
//! │  ChatEvent: Notifications for the view layer                    │
//! │  ├── Opened: Topic opened with its history loaded               │
//! │  ├── MessagesChanged: Sequence changed (echo, confirm, inbound) │
//! │  ├── SendFailed: A write was rejected, body kept for resend     │
//! │  ├── SubscriptionLost: Realtime stream ended                    │
//! │  └── Closed: Topic closed locally                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::types::{LocalId, TopicId};

/// Status of the realtime stream for the open topic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TopicStatus {
    /// No topic is open
    #[default]
    Closed,
    /// Subscribed to a topic
    Live(TopicId),
    /// The stream for this topic ended on its own
    Lost(TopicId),
}

impl TopicStatus {
    pub fn topic(&self) -> Option<&TopicId> {
        match self {
            TopicStatus::Closed => None,
            TopicStatus::Live(topic) | TopicStatus::Lost(topic) => Some(topic),
        }
    }
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicStatus::Closed => write!(f, "Closed"),
            TopicStatus::Live(topic) => write!(f, "Live ({})", topic),
            TopicStatus::Lost(topic) => write!(f, "Lost ({})", topic),
        }
    }
}

/// Events emitted by the chat client
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A topic was opened and its recent history merged
    Opened {
        topic: TopicId,
        /// Entries in the sequence after the history load
        message_count: usize,
    },
    /// The message sequence changed
    MessagesChanged {
        topic: TopicId,
        /// Entries in the sequence after the change
        len: usize,
    },
    /// A send was rejected by the store
    SendFailed {
        topic: TopicId,
        local_id: LocalId,
        /// Error message from the store
        reason: String,
    },
    /// The realtime stream for the topic ended
    SubscriptionLost { topic: TopicId },
    /// The topic was closed locally
    Closed { topic: TopicId },
}

impl ChatEvent {
    /// Get the topic this event refers to
    pub fn topic(&self) -> &TopicId {
        match self {
            ChatEvent::Opened { topic, .. }
            | ChatEvent::MessagesChanged { topic, .. }
            | ChatEvent::SendFailed { topic, .. }
            | ChatEvent::SubscriptionLost { topic }
            | ChatEvent::Closed { topic } => topic,
        }
    }
}
