//! Conversation messaging with optimistic sends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Client Layer (client.rs)                                       │
//! │  - ChatClient: one open topic, send / retry / mark read         │
//! │  - ConversationView: shared read view for the UI                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Reconciliation (conversation.rs)                               │
//! │  - Conversation: echo + confirmation + stream, deduplicated     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Backend (crate::backend)                                       │
//! │  - MessageStore: commit rows, history, read state               │
//! │  - RealtimeTransport: per-topic insert stream                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Message Flow
//!
//! **Sending:**
//! 1. `send()` appends a `Pending` echo under a fresh `LocalId`
//! 2. The store commits the row and returns it with its server id
//! 3. The echo is replaced in place by the confirmed row
//!
//! **Receiving:**
//! 1. The topic pump receives committed rows from the realtime stream
//! 2. Rows already present are dropped; own rows racing their echo are held
//! 3. Everything else is appended in arrival order

mod client;
mod conversation;
mod events;
mod message;

pub use client::{ChatClient, ConversationView};
pub use conversation::{Conversation, RemoteOutcome};
pub use events::{ChatEvent, TopicStatus};
pub use message::{DeliveryState, Message};
