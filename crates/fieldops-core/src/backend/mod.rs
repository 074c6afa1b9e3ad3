//! Contracts with the hosted data-and-auth platform
//!
//! The core never talks to the network directly. It consumes these traits,
//! which the application wires to the real platform client and tests wire to
//! [`memory::MemoryPlatform`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  IdentityProvider    sign_in / sign_out / current_session       │
//! │                      on_identity_change -> Subscription         │
//! │  ProfileStore        fetch_profile                              │
//! │  MessageStore        create_message / list_messages / mark_read │
//! │  RealtimeTransport   subscribe_topic -> Subscription<Message>   │
//! │  InterruptTransport  subscribe_interrupts                       │
//! │  RecoveryNavigator   navigate_to_recovery (ack side effect)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Push streams are delivered at-least-once and ordered per topic; there is
//! no ordering across topics.

pub mod memory;
mod subscription;

pub use subscription::{Subscription, SubscriptionGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::Message;
use crate::error::{CoreResult, CredentialError};
use crate::interrupt::InterruptEvent;
use crate::types::{Credentials, Identity, Profile, TopicId};

/// Kind of identity-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Notification pushed by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityChange {
    pub event: AuthEvent,
    pub identity: Option<Identity>,
}

impl IdentityChange {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            identity: Some(identity),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            identity: None,
        }
    }

    pub fn token_refreshed(identity: Identity) -> Self {
        Self {
            event: AuthEvent::TokenRefreshed,
            identity: Some(identity),
        }
    }
}

/// Credential exchange with the external identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, CredentialError>;

    /// Best-effort remote sign-out
    async fn sign_out(&self) -> CoreResult<()>;

    /// Startup probe for a still-valid stored credential
    async fn current_session(&self) -> CoreResult<Option<Identity>>;

    /// Register for identity-change notifications
    fn on_identity_change(&self) -> Subscription<IdentityChange>;
}

/// Profile rows keyed by identity
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fails with `CoreError::ProfileNotFound` when no row exists
    async fn fetch_profile(&self, identity: &Identity) -> CoreResult<Profile>;
}

/// Message rows keyed by topic
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Commit a message; the returned message carries the server id and timestamp
    async fn create_message(
        &self,
        topic: &TopicId,
        sender: &Identity,
        body: &str,
    ) -> CoreResult<Message>;

    /// Most recent `limit` messages, oldest first
    async fn list_messages(&self, topic: &TopicId, limit: usize) -> CoreResult<Vec<Message>>;

    /// Mark every message in `topic` not authored by `reader` as read now
    async fn mark_read(&self, topic: &TopicId, reader: &Identity) -> CoreResult<()>;
}

/// Server-filtered insert stream per topic
pub trait RealtimeTransport: Send + Sync {
    fn subscribe_topic(&self, topic: &TopicId) -> CoreResult<Subscription<Message>>;
}

/// Process-wide interrupt stream
pub trait InterruptTransport: Send + Sync {
    fn subscribe_interrupts(&self) -> CoreResult<Subscription<InterruptEvent>>;
}

/// The one externally visible side effect of acknowledging an interrupt
pub trait RecoveryNavigator: Send + Sync {
    fn navigate_to_recovery(&self, event: &InterruptEvent);
}
