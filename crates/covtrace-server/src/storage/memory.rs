//! In-memory storage backend
//!
//! Default storage implementation using in-memory collections.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use covtrace_core::{LocationRecord, Role};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, info};

use super::{ActivationCode, Store, StorageError};

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: RwLock<Vec<ActivationCode>>,
    records: RwLock<Vec<LocationRecord>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records
    pub fn location_records(&self) -> Vec<LocationRecord> {
        self.records.read().unwrap().clone()
    }

    /// Number of code entries held, live or expired
    pub fn code_entries(&self) -> usize {
        self.codes.read().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Activation Codes
    // =========================================================================

    async fn insert_activation_code(&self, code: ActivationCode) -> Result<(), StorageError> {
        self.ensure_open()?;
        if code.role.activation_ttl().is_none() {
            return Err(StorageError::UnsupportedRole(code.role));
        }
        debug!(did = %code.did, role = %code.role, "Storing activation code");
        self.codes.write().unwrap().push(code);
        Ok(())
    }

    async fn consume_activation_code(
        &self,
        did: &str,
        role: Role,
        code: &str,
    ) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut codes = self.codes.write().unwrap();

        let matches = |entry: &ActivationCode| {
            entry.did == did && entry.role == role && entry.code == code
        };
        let found = codes.iter().any(|entry| matches(entry) && entry.is_live_at(now));
        if found {
            codes.retain(|entry| !matches(entry));
        }
        Ok(found)
    }

    async fn purge_expired_codes(&self) -> Result<u64, StorageError> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut codes = self.codes.write().unwrap();
        let before = codes.len();
        codes.retain(|entry| entry.is_live_at(now));
        let purged = (before - codes.len()) as u64;
        if purged > 0 {
            info!(purged, "Purged expired activation codes");
        }
        Ok(purged)
    }

    // =========================================================================
    // Location Records
    // =========================================================================

    async fn insert_location_records(&self, records: &[LocationRecord]) -> Result<u64, StorageError> {
        self.ensure_open()?;
        self.records.write().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn count_location_records(&self) -> Result<u64, StorageError> {
        self.ensure_open()?;
        Ok(self.records.read().unwrap().len() as u64)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn ping(&self) -> Result<(), StorageError> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Memory store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consume_once() {
        let store = MemoryStore::new();
        store
            .insert_activation_code(ActivationCode::new("did:bryk:1", Role::User, "abc"))
            .await
            .unwrap();

        assert!(store.consume_activation_code("did:bryk:1", Role::User, "abc").await.unwrap());
        assert!(!store.consume_activation_code("did:bryk:1", Role::User, "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_requires_exact_match() {
        let store = MemoryStore::new();
        store
            .insert_activation_code(ActivationCode::new("did:bryk:1", Role::User, "abc"))
            .await
            .unwrap();

        assert!(!store.consume_activation_code("did:bryk:2", Role::User, "abc").await.unwrap());
        assert!(!store.consume_activation_code("did:bryk:1", Role::Agent, "abc").await.unwrap());
        assert!(!store.consume_activation_code("did:bryk:1", Role::User, "abd").await.unwrap());
        assert!(store.consume_activation_code("did:bryk:1", Role::User, "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicates_removed_together() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store
                .insert_activation_code(ActivationCode::new("did:bryk:1", Role::Agent, "dup"))
                .await
                .unwrap();
        }

        assert!(store.consume_activation_code("did:bryk:1", Role::Agent, "dup").await.unwrap());
        assert_eq!(store.code_entries(), 0);
    }

    #[tokio::test]
    async fn test_expired_code_rejected_and_purged() {
        let store = MemoryStore::new();
        let mut code = ActivationCode::new("did:bryk:1", Role::User, "old");
        code.created_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert_activation_code(code).await.unwrap();
        store
            .insert_activation_code(ActivationCode::new("did:bryk:1", Role::User, "new"))
            .await
            .unwrap();

        assert!(!store.consume_activation_code("did:bryk:1", Role::User, "old").await.unwrap());
        assert_eq!(store.purge_expired_codes().await.unwrap(), 1);
        assert_eq!(store.code_entries(), 1);
    }

    #[tokio::test]
    async fn test_admin_codes_refused() {
        let store = MemoryStore::new();
        let result = store
            .insert_activation_code(ActivationCode::new("did:bryk:1", Role::Admin, "x"))
            .await;
        assert!(matches!(result, Err(StorageError::UnsupportedRole(Role::Admin))));
    }

    #[tokio::test]
    async fn test_records_and_close() {
        let store = MemoryStore::new();
        let records = vec![LocationRecord::new("did:bryk:1", 1.0, 2.0, 0.0, 10); 3];

        assert_eq!(store.insert_location_records(&records).await.unwrap(), 3);
        assert_eq!(store.count_location_records().await.unwrap(), 3);

        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(store.ping().await, Err(StorageError::Closed)));
        assert!(matches!(
            store.insert_location_records(&records).await,
            Err(StorageError::Closed)
        ));
    }
}
