//! Common types used across the covtrace platform

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Role attached to every credential and activation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular application user
    User,
    /// Health agent allowed to send notifications
    Agent,
    /// Platform administrator
    Admin,
}

impl Role {
    /// All supported roles
    pub const ALL: [Role; 3] = [Role::User, Role::Agent, Role::Admin];

    /// Lowercase name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    /// How long an activation code for this role stays usable.
    ///
    /// Administrators never receive activation codes, so `None` is returned
    /// for `Role::Admin`.
    pub fn activation_ttl(&self) -> Option<Duration> {
        match self {
            Role::User => Some(Duration::from_secs(60)),
            Role::Agent => Some(Duration::from_secs(86_400)),
            Role::Admin => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// Claims carried by a bearer credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Audience (server name)
    pub aud: String,
    /// Decentralized identifier of the holder
    pub did: String,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Issuer (server name)
    pub iss: String,
    /// Unique token identifier
    pub jti: String,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Role granted to the holder
    pub role: Role,
    /// Subject, always equal to `did`
    pub sub: String,
}

impl CredentialClaims {
    /// Build a fresh claim set for `did` valid from `issued_at` for `lifetime`
    pub fn new(
        server_name: impl Into<String>,
        did: impl Into<String>,
        role: Role,
        issued_at: chrono::DateTime<chrono::Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        let server_name = server_name.into();
        let did = did.into();
        let iat = issued_at.timestamp();
        Self {
            aud: server_name.clone(),
            sub: did.clone(),
            did,
            exp: (issued_at + lifetime).timestamp(),
            iat,
            iss: server_name,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: iat,
            role,
        }
    }

    /// Whether the claims are expired at `now` (unix seconds)
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }
}
