//! Runtime configuration for the console core
//!
//! All fields have defaults, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "session": { "max_attempts": 5 }, "chat": { "history_limit": 100 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const DEFAULT_INITIAL_FETCH_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_RETRY_FETCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_REMEMBERED_INTERRUPT_IDS: usize = 1024;

/// Profile loading policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for the first profile fetch of a loading cycle
    pub initial_fetch_timeout_ms: u64,
    /// Timeout for every retry after the first
    pub retry_fetch_timeout_ms: u64,
    /// Delay before each retry
    pub retry_backoff_ms: u64,
    /// Attempt cap; reaching it without a profile fails the load
    pub max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_fetch_timeout_ms: DEFAULT_INITIAL_FETCH_TIMEOUT_MS,
            retry_fetch_timeout_ms: DEFAULT_RETRY_FETCH_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    /// Timeout that applies to the given 1-based attempt
    pub fn fetch_timeout(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::from_millis(self.initial_fetch_timeout_ms)
        } else {
            Duration::from_millis(self.retry_fetch_timeout_ms)
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Conversation view settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How many messages to load when a topic is opened
    pub history_limit: usize,
    /// Capacity of the chat event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Interrupt channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// How many acknowledged interrupt ids are remembered for redelivery suppression
    pub remembered_ids: usize,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            remembered_ids: DEFAULT_REMEMBERED_INTERRUPT_IDS,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub session: SessionConfig,
    pub chat: ChatConfig,
    pub interrupts: InterruptConfig,
}

impl CoreConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: CoreConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the state machines cannot run with
    pub fn validate(&self) -> CoreResult<()> {
        if self.session.max_attempts == 0 {
            return Err(CoreError::Config(
                "session.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.session.initial_fetch_timeout_ms == 0 || self.session.retry_fetch_timeout_ms == 0 {
            return Err(CoreError::Config(
                "profile fetch timeouts must be non-zero".to_string(),
            ));
        }
        if self.chat.event_channel_capacity == 0 {
            return Err(CoreError::Config(
                "chat.event_channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.interrupts.remembered_ids == 0 {
            return Err(CoreError::Config(
                "interrupts.remembered_ids must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_policy() {
        let config = CoreConfig::default();
        assert_eq!(config.session.fetch_timeout(1), Duration::from_secs(15));
        assert_eq!(config.session.fetch_timeout(2), Duration::from_secs(5));
        assert_eq!(config.session.fetch_timeout(3), Duration::from_secs(5));
        assert_eq!(config.session.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.session.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CoreConfig::from_json_str(r#"{"session":{"max_attempts":5},"chat":{"history_limit":10}}"#)
                .unwrap();
        assert_eq!(config.session.max_attempts, 5);
        assert_eq!(config.session.retry_backoff_ms, 1_000);
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.chat.event_channel_capacity, 256);
        assert_eq!(config.interrupts, InterruptConfig::default());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = CoreConfig::from_json_str(r#"{"session":{"max_attempts":0}}"#).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = CoreConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"interrupts":{{"remembered_ids":8}}}}"#).unwrap();

        let config = CoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.interrupts.remembered_ids, 8);
    }
}
