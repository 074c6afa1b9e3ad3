//! Session state values

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Identity, Profile};

/// Why a profile load gave up for the current identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileFailure {
    /// Every attempt up to the cap timed out
    TimedOut { attempts: u32 },
    /// The store has no profile row for the identity
    NotFound,
    /// The store kept failing, or failed with a non-retryable error
    Unavailable(String),
}

impl fmt::Display for ProfileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileFailure::TimedOut { attempts } => {
                write!(f, "profile fetch timed out after {} attempts", attempts)
            }
            ProfileFailure::NotFound => write!(f, "no profile exists for this account"),
            ProfileFailure::Unavailable(msg) => write!(f, "profile store unavailable: {}", msg),
        }
    }
}

/// Observable session state.
///
/// Exactly one value per [`SessionManager`](super::SessionManager); consumers
/// read it, only the manager's transitions write it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// Credential exchange succeeded or a stored credential was found,
    /// identity not yet handed to the profile loader
    Authenticating,
    ProfileLoading {
        identity: Identity,
        /// 1-based attempt number within the current loading cycle
        attempt: u32,
    },
    Authenticated {
        identity: Identity,
        profile: Profile,
    },
    /// Recoverable error, see `SessionManager::retry_profile_fetch`
    ProfileFailed {
        identity: Identity,
        reason: ProfileFailure,
    },
}

impl SessionState {
    /// Identity the state refers to, if any
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Unauthenticated | SessionState::Authenticating => None,
            SessionState::ProfileLoading { identity, .. }
            | SessionState::Authenticated { identity, .. }
            | SessionState::ProfileFailed { identity, .. } => Some(identity),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            SessionState::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }

    /// Current attempt while loading, 0 otherwise
    pub fn attempt(&self) -> u32 {
        match self {
            SessionState::ProfileLoading { attempt, .. } => *attempt,
            _ => 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::ProfileFailed { .. })
    }

    /// Whether the UI should show a busy indicator
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticating | SessionState::ProfileLoading { .. }
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "Unauthenticated"),
            SessionState::Authenticating => write!(f, "Authenticating"),
            SessionState::ProfileLoading { identity, attempt } => {
                write!(f, "ProfileLoading({}, attempt {})", identity, attempt)
            }
            SessionState::Authenticated { identity, profile } => {
                write!(f, "Authenticated({}, {})", identity, profile.role)
            }
            SessionState::ProfileFailed { identity, reason } => {
                write!(f, "ProfileFailed({}: {})", identity, reason)
            }
        }
    }
}
