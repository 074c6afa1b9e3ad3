//! Application profile attached to an authenticated identity
//!
//! The profile carries the console role that decides which areas an operator
//! may open, plus the verification flag set by an administrator.

use serde::{Deserialize, Serialize};

use super::Identity;

/// Console role of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full console access, manages officers and operators
    Admin,
    /// Field officer working assigned cases
    Officer,
    /// Citizen-facing chat operator
    Operator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Officer => write!(f, "officer"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "officer" => Ok(Role::Officer),
            "operator" => Ok(Role::Operator),
            other => Err(format!(
                "Invalid role '{}'. Must be one of: admin, officer, operator",
                other
            )),
        }
    }
}

/// Application-level record for an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Same value as the owning identity
    pub id: Identity,

    pub role: Role,

    /// Set once an administrator has verified the account
    pub verified: bool,

    /// Display name shown in the console header and chat
    pub display_name: String,

    /// Free-form domain attributes (station, badge number, ...)
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    /// Create a new unverified profile with no extra attributes
    pub fn new(id: Identity, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            id,
            role,
            verified: false,
            display_name: display_name.into(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Whether this profile's role is one of `allowed`
    pub fn has_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }
}
