//! Interrupt event type

use serde::{Deserialize, Serialize};

use crate::types::now_millis;

/// Id of an interrupt as assigned by the broadcaster.
///
/// Redeliveries of the same interrupt carry the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterruptId(pub String);

impl InterruptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for InterruptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A high-priority, session-wide notification (e.g. an emergency alert)
/// that blocks normal interaction until acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptEvent {
    pub id: InterruptId,
    /// Broadcaster-defined category, e.g. "emergency_alert"
    pub kind: String,
    pub payload: serde_json::Value,
    /// Unix timestamp in milliseconds when this client received it
    pub received_at: i64,
    pub acknowledged: bool,
}

impl InterruptEvent {
    pub fn new(id: InterruptId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            payload,
            received_at: now_millis(),
            acknowledged: false,
        }
    }

    /// Short human-readable line for banners and logs.
    ///
    /// Uses the payload's `title` field when present.
    pub fn headline(&self) -> String {
        match self.payload.get("title").and_then(|t| t.as_str()) {
            Some(title) => format!("[{}] {}", self.kind, title),
            None => format!("[{}] {}", self.kind, self.id),
        }
    }
}
