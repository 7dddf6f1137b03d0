//! Storage abstraction for the covtrace server
//!
//! Activation codes and location records live behind the [`Store`] trait,
//! with an in-memory backend (default) and a PostgreSQL backend
//! (`postgres` feature).
//!
//! Activation codes expire by age: a code is usable while
//! `created_at + role TTL > now`. Expired codes are invisible to
//! consumption and removed by [`Store::purge_expired_codes`].

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covtrace_core::{LocationRecord, Role};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Role '{0}' cannot hold activation codes")]
    UnsupportedRole(Role),

    #[error("Store is closed")]
    Closed,
}

/// A one-shot activation code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationCode {
    pub did: String,
    pub role: Role,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

impl ActivationCode {
    /// Create a code issued now
    pub fn new(did: impl Into<String>, role: Role, code: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            role,
            code: code.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether the code is still usable at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match expiry_cutoff(self.role, now) {
            Some(cutoff) => self.created_at > cutoff,
            None => false,
        }
    }
}

/// Codes created at or before the returned instant are expired
pub(crate) fn expiry_cutoff(role: Role, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ttl = role.activation_ttl()?;
    let ttl = chrono::Duration::from_std(ttl).ok()?;
    Some(now - ttl)
}

/// Storage backend trait for server state
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    // =========================================================================
    // Activation Codes
    // =========================================================================

    /// Persist a freshly generated code
    async fn insert_activation_code(&self, code: ActivationCode) -> Result<(), StorageError>;

    /// Atomically delete every live entry matching `(did, role, code)`.
    ///
    /// Returns `true` if at least one entry was deleted. Concurrent callers
    /// racing on the same code observe exactly one `true`.
    async fn consume_activation_code(
        &self,
        did: &str,
        role: Role,
        code: &str,
    ) -> Result<bool, StorageError>;

    /// Remove expired codes, returning how many were deleted
    async fn purge_expired_codes(&self) -> Result<u64, StorageError>;

    // =========================================================================
    // Location Records
    // =========================================================================

    /// Persist a batch of validated records in a single operation
    async fn insert_location_records(&self, records: &[LocationRecord]) -> Result<u64, StorageError>;

    /// Number of stored records
    async fn count_location_records(&self) -> Result<u64, StorageError>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Release connections; further calls fail with [`StorageError::Closed`]
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_liveness() {
        let now = Utc::now();
        let mut code = ActivationCode::new("did:bryk:1", Role::User, "c");
        code.created_at = now - chrono::Duration::seconds(59);
        assert!(code.is_live_at(now));

        code.created_at = now - chrono::Duration::seconds(60);
        assert!(!code.is_live_at(now));

        code.role = Role::Agent;
        assert!(code.is_live_at(now));
    }

    #[test]
    fn test_admin_codes_never_live() {
        let code = ActivationCode::new("did:bryk:1", Role::Admin, "c");
        assert!(!code.is_live_at(Utc::now()));
    }
}
