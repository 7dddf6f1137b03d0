//! # covtrace core
//!
//! Domain types and cryptographic primitives for the covtrace contact-tracing
//! backend.
//!
//! ## Key Concepts
//!
//! - **Identity**: a DID plus its resolved document of named public keys
//! - **LD signature**: an envelope naming the signing key, creation time,
//!   domain and nonce, verified by [`signature::verify_envelope`]
//! - **Location record**: a signed, hashed location sample; see
//!   [`record::validate_record`] for the validity rules
//! - **Server keys**: the root seed from which the token master key and the
//!   refresh-code secret are derived
//!
//! This crate performs no network I/O. Resolution, storage and transport live
//! in `covtrace-resolver` and `covtrace-server`.

pub mod crypto;
pub mod did;
pub mod error;
pub mod keyed_hash;
pub mod keys;
pub mod record;
pub mod signature;
pub mod types;

pub use crypto::{KeyPair, PublicKey};
pub use did::{Did, DidDocument, Identity, PublicKeyEntry};
pub use error::{CoreError, Result};
pub use keyed_hash::{constant_time_eq, Blake3Keyed, HmacSha256, KeyedHasher};
pub use keys::{RefreshHash, ServerKeys, MASTER_KEY_ID, REFRESH_KEY_FILE, ROOT_KEY_FILE};
pub use record::{
    record_hash, validate_record, LocationRecord, RecordBatch, RecordRejection, MAX_BATCH_SIZE,
};
pub use signature::{SignatureEnvelope, SignatureError};
pub use types::{CredentialClaims, Role};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
