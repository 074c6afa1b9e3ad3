//! Chat message types for display and reconciliation
//!
//! A [`Message`] is either an optimistic local echo (`Pending`/`Failed`,
//! keyed by a [`LocalId`]) or a row committed by the message store
//! (`Confirmed`, keyed by a server [`MessageId`]). A confirmed entry that
//! started life as a local echo keeps its `local_id`.

use serde::{Deserialize, Serialize};

use crate::types::{now_millis, Identity, LocalId, MessageId, TopicId};

/// Delivery state of a message in the local sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Shown locally, write not yet acknowledged by the store
    Pending,
    /// Committed by the store, carries a server id
    Confirmed,
    /// Write failed; body kept so the user can resend
    Failed,
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::Confirmed => write!(f, "confirmed"),
            DeliveryState::Failed => write!(f, "failed"),
        }
    }
}

/// A chat message in a conversation topic.
///
/// # Example
///
/// ```ignore
/// let echo = Message::pending(LocalId::new(), topic.clone(), me.clone(), "On my way");
/// assert_eq!(echo.delivery, DeliveryState::Pending);
/// assert!(echo.id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-issued id; `None` until the store confirms the write
    pub id: Option<MessageId>,
    /// Temporary id of the optimistic echo this entry came from
    pub local_id: Option<LocalId>,
    pub topic: TopicId,
    pub sender_id: Identity,
    pub body: String,
    /// Unix timestamp in milliseconds (server time once confirmed)
    pub created_at: i64,
    /// When the current user read this message, if ever
    pub read_at: Option<i64>,
    pub delivery: DeliveryState,
}

impl Message {
    /// Create an optimistic echo for a message the current user is sending.
    pub fn pending(
        local_id: LocalId,
        topic: TopicId,
        sender_id: Identity,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            local_id: Some(local_id),
            topic,
            sender_id,
            body: body.into(),
            created_at: now_millis(),
            read_at: None,
            delivery: DeliveryState::Pending,
        }
    }

    /// Create a committed message as delivered by the store or the realtime stream.
    pub fn confirmed(
        id: MessageId,
        topic: TopicId,
        sender_id: Identity,
        body: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Some(id),
            local_id: None,
            topic,
            sender_id,
            body: body.into(),
            created_at,
            read_at: None,
            delivery: DeliveryState::Confirmed,
        }
    }

    pub fn is_from(&self, identity: &Identity) -> bool {
        &self.sender_id == identity
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.delivery == DeliveryState::Failed
    }

    pub fn is_confirmed(&self) -> bool {
        self.delivery == DeliveryState::Confirmed
    }
}
