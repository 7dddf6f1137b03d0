//! Location records and their integrity checks

use crate::crypto::KeyPair;
use crate::did::Identity;
use crate::error::Result;
use crate::signature::{self, SignatureError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Largest batch accepted in a single submission
pub const MAX_BATCH_SIZE: usize = 100;

/// A signed location sample submitted by a client.
///
/// Every field defaults when absent so a single incomplete record does not
/// prevent the rest of its batch from being decoded; incomplete records are
/// rejected later by [`validate_record`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationRecord {
    pub did: String,
    pub lat: f32,
    pub lng: f32,
    pub alt: f32,
    /// Unix seconds
    pub timestamp: i64,
    /// Lowercase hex of [`record_hash`]
    pub hash: String,
    /// LD-signature envelope over `hash`
    pub proof: serde_json::Value,
}

impl LocationRecord {
    /// Build an unsigned record with its content hash filled in
    pub fn new(did: impl Into<String>, lat: f32, lng: f32, alt: f32, timestamp: i64) -> Self {
        let mut record = Self {
            did: did.into(),
            lat,
            lng,
            alt,
            timestamp,
            ..Default::default()
        };
        record.hash = record.compute_hash();
        record
    }

    /// Hash of the record's current content
    pub fn compute_hash(&self) -> String {
        record_hash(&self.did, self.lat, self.lng, self.alt, self.timestamp)
    }

    /// Attach a proof over the record hash
    pub fn sign(mut self, key: &KeyPair, creator: &str, domain: &str) -> Result<Self> {
        let envelope = signature::sign(key, creator, self.hash.as_bytes(), domain);
        self.proof = serde_json::to_value(envelope)?;
        Ok(self)
    }
}

/// Batch of records submitted together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    #[serde(default)]
    pub records: Vec<LocationRecord>,
}

impl RecordBatch {
    pub fn new(records: Vec<LocationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the batch exceeds [`MAX_BATCH_SIZE`]
    pub fn is_oversized(&self) -> bool {
        self.records.len() > MAX_BATCH_SIZE
    }
}

/// Deterministic content hash of a record
pub fn record_hash(did: &str, lat: f32, lng: f32, alt: f32, timestamp: i64) -> String {
    let input = format!("{did}|{lat:.6}|{lng:.6}|{alt:.6}|{timestamp}");
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Why a record was dropped during validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordRejection {
    #[error("record DID '{record}' does not match submitter '{submitter}'")]
    DidMismatch { record: String, submitter: String },

    #[error("record has zero coordinates")]
    MissingCoordinates,

    #[error("timestamp {timestamp} outside (0, {now}]")]
    InvalidTimestamp { timestamp: i64, now: i64 },

    #[error("content hash mismatch")]
    HashMismatch,

    #[error("proof rejected: {0}")]
    Signature(#[from] SignatureError),
}

/// Check a record against its submitter's resolved identity.
///
/// A record is valid iff its DID is the submitter's, both coordinates are
/// non-zero, `0 < timestamp <= now`, the stored hash matches the content and
/// the proof verifies against one of the identity's keys.
pub fn validate_record(
    identity: &Identity,
    record: &LocationRecord,
    now: i64,
) -> std::result::Result<(), RecordRejection> {
    let submitter = identity.did();
    if record.did != submitter {
        return Err(RecordRejection::DidMismatch {
            record: record.did.clone(),
            submitter,
        });
    }

    if record.lat == 0.0 || record.lng == 0.0 {
        return Err(RecordRejection::MissingCoordinates);
    }

    if record.timestamp <= 0 || record.timestamp > now {
        return Err(RecordRejection::InvalidTimestamp {
            timestamp: record.timestamp,
            now,
        });
    }

    if record.hash != record.compute_hash() {
        return Err(RecordRejection::HashMismatch);
    }

    signature::verify_value(identity, record.hash.as_bytes(), &record.proof)?;
    Ok(())
}
