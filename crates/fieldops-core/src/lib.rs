//! FieldOps Console Core Library
//!
//! Session bootstrap, conversation messaging and interrupt handling for the
//! field operations console.
//!
//! ## Overview
//!
//! The console talks to a hosted backend (identity provider, profile store,
//! message store, realtime push channels). This crate holds the client-side
//! logic between those services and the view layer:
//!
//! - **Session**: a single state machine from credential to authorized
//!   profile, with bounded retries when the profile store is slow
//! - **Chat**: optimistic sends reconciled against confirmations and the
//!   realtime stream, without duplicates
//! - **Interrupts**: session-wide alerts, one active at a time, acknowledged
//!   exactly once
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fieldops_core::{ChatClient, CoreConfig, Credentials, SessionManager, TopicId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::default();
//!     let session = SessionManager::new(identity.clone(), profiles.clone(), config.session.clone());
//!     session.initialize()?;
//!     session.login(&Credentials::new("officer@example.org", "secret")).await?;
//!
//!     // ... wait for SessionState::Authenticated ...
//!     let chat = ChatClient::for_session(&session, store, transport, config.chat.clone())?;
//!     chat.open(TopicId::new("case-42")).await?;
//!     chat.send("On my way").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod session;
pub mod types;

// Re-exports
pub use backend::{
    AuthEvent, IdentityChange, IdentityProvider, InterruptTransport, MessageStore, ProfileStore,
    RealtimeTransport, RecoveryNavigator, Subscription,
};
pub use chat::{ChatClient, ChatEvent, Conversation, ConversationView, DeliveryState, Message};
pub use config::{ChatConfig, CoreConfig, InterruptConfig, SessionConfig};
pub use error::{CoreError, CoreResult, CredentialError};
pub use interrupt::{InterruptChannel, InterruptEvent, InterruptId};
pub use session::{ProfileFailure, SessionManager, SessionState};
pub use types::*;
