//! Error types for the FieldOps console core

use thiserror::Error;

use crate::types::{LocalId, Role};

/// Failures of the credential exchange with the identity provider.
///
/// These are user-facing and recoverable by re-entering credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Email/password pair was rejected
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Too many attempts; the provider is throttling sign-ins
    #[error("Too many sign-in attempts, try again later")]
    RateLimited,

    /// The account exists but its email address was never confirmed
    #[error("Account email is not confirmed")]
    UnconfirmedAccount,
}

/// Main error type for console core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Sign-in was rejected by the identity provider
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Profile fetch kept timing out until the attempt cap was reached
    #[error("Profile fetch timed out after {attempts} attempts")]
    ProfileFetchTimeout { attempts: u32 },

    /// No profile row exists for the identity
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The profile store could not be reached
    #[error("Profile store unavailable: {0}")]
    ProfileUnavailable(String),

    /// A chat message could not be written; the body is handed back for resending
    #[error("Failed to send message {local_id}: {reason}")]
    SendFailure {
        local_id: LocalId,
        body: String,
        reason: String,
    },

    /// Realtime subscription could not be opened or was lost
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Error reported by the hosted data platform
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation needs an authenticated session with a loaded profile
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The current profile's role is not allowed here
    #[error("Role {role} is not permitted for this operation")]
    Forbidden { role: Role },

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the error is worth retrying locally (timeouts, throttling, flaky backend).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::ProfileFetchTimeout { .. }
                | CoreError::ProfileUnavailable(_)
                | CoreError::Backend(_)
                | CoreError::Credential(CredentialError::RateLimited)
        )
    }
}

/// Result type alias using CoreError
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::ProfileNotFound("user-1".to_string());
        assert_eq!(format!("{}", err), "Profile not found: user-1");

        let err = CoreError::ProfileFetchTimeout { attempts: 3 };
        assert_eq!(
            format!("{}", err),
            "Profile fetch timed out after 3 attempts"
        );
    }

    #[test]
    fn test_credential_error_converts() {
        let err: CoreError = CredentialError::RateLimited.into();
        assert!(matches!(
            err,
            CoreError::Credential(CredentialError::RateLimited)
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_structural_errors_are_not_transient() {
        assert!(!CoreError::ProfileNotFound("x".into()).is_transient());
        assert!(!CoreError::Credential(CredentialError::InvalidCredentials).is_transient());
        assert!(CoreError::ProfileUnavailable("503".into()).is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
