//! Linked-data signature envelopes
//!
//! The verifier in this module is the single trust primitive of the platform:
//! the credentials endpoint and the record worker both go through
//! [`verify_envelope`] so a proof accepted by one is accepted by the other.
//!
//! Signing input layout:
//!
//! ```text
//! SHA-256(payload) || u32be(len(created)) || created
//!                  || u32be(len(domain))  || domain
//!                  || u32be(len(nonce))   || nonce
//! ```

use crate::crypto::{KeyPair, PublicKey};
use crate::did::{Identity, ED25519_KEY_TYPE};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// JSON-LD context attached to every envelope
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

/// Signature suite produced by [`sign`]
pub const SIGNATURE_TYPE: &str = "Ed25519Signature2018";

/// Reasons a signature envelope is not accepted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Envelope could not be decoded
    #[error("Malformed signature envelope: {0}")]
    MalformedEnvelope(String),

    /// Creator key is not declared by the identity
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Creator key is declared but cannot verify Ed25519 signatures
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Signature does not verify
    #[error("Invalid signature")]
    InvalidSignature,
}

/// LD-signature envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,

    #[serde(rename = "type", default)]
    pub signature_type: String,

    /// Key reference, `did#fragment`
    pub creator: String,

    /// Creation time (RFC 3339)
    pub created: String,

    pub domain: String,

    /// 16 random bytes, hex encoded
    pub nonce: String,

    /// Base64 Ed25519 signature
    #[serde(rename = "signatureValue")]
    pub signature_value: String,
}

impl SignatureEnvelope {
    /// Decode an envelope from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        serde_json::from_slice(bytes).map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))
    }

    /// Decode an envelope from an already parsed JSON value
    pub fn from_value(value: &serde_json::Value) -> Result<Self, SignatureError> {
        Self::deserialize(value).map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))
    }

    /// Bytes covered by the signature for `payload`
    pub fn signing_input(&self, payload: &[u8]) -> Vec<u8> {
        signing_input(payload, &self.created, &self.domain, &self.nonce)
    }
}

/// Build the signing input for `payload` and the envelope metadata
pub fn signing_input(payload: &[u8], created: &str, domain: &str, nonce: &str) -> Vec<u8> {
    let digest = Sha256::digest(payload);
    let mut input =
        Vec::with_capacity(digest.len() + 12 + created.len() + domain.len() + nonce.len());
    input.extend_from_slice(&digest);
    for field in [created, domain, nonce] {
        input.extend_from_slice(&(field.len() as u32).to_be_bytes());
        input.extend_from_slice(field.as_bytes());
    }
    input
}

/// Produce an envelope over `payload` with `key`, naming `creator` as the signer
pub fn sign(
    key: &KeyPair,
    creator: impl Into<String>,
    payload: &[u8],
    domain: impl Into<String>,
) -> SignatureEnvelope {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut envelope = SignatureEnvelope {
        context: vec![SECURITY_CONTEXT.to_string()],
        signature_type: SIGNATURE_TYPE.to_string(),
        creator: creator.into(),
        created: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        domain: domain.into(),
        nonce: hex::encode(nonce),
        signature_value: String::new(),
    };
    let signature = key.sign(&envelope.signing_input(payload));
    envelope.signature_value = STANDARD.encode(signature);
    envelope
}

/// Verify raw envelope bytes over `payload` against `identity`
pub fn verify(identity: &Identity, payload: &[u8], envelope: &[u8]) -> Result<(), SignatureError> {
    let envelope = SignatureEnvelope::from_slice(envelope)?;
    verify_envelope(identity, payload, &envelope)
}

/// Verify a JSON envelope over `payload` against `identity`
pub fn verify_value(
    identity: &Identity,
    payload: &[u8],
    envelope: &serde_json::Value,
) -> Result<(), SignatureError> {
    let envelope = SignatureEnvelope::from_value(envelope)?;
    verify_envelope(identity, payload, &envelope)
}

/// Verify a decoded envelope over `payload` against `identity`
pub fn verify_envelope(
    identity: &Identity,
    payload: &[u8],
    envelope: &SignatureEnvelope,
) -> Result<(), SignatureError> {
    let entry = identity
        .key(&envelope.creator)
        .ok_or_else(|| SignatureError::KeyNotFound(envelope.creator.clone()))?;

    if entry.key_type != ED25519_KEY_TYPE {
        return Err(SignatureError::UnsupportedKeyType(entry.key_type.clone()));
    }
    let public_key = entry
        .public_key()
        .map_err(|e| SignatureError::UnsupportedKeyType(e.to_string()))?;

    verify_with_key(&public_key, payload, envelope)
}

/// Verify an envelope directly against a public key
pub fn verify_with_key(
    public_key: &PublicKey,
    payload: &[u8],
    envelope: &SignatureEnvelope,
) -> Result<(), SignatureError> {
    let signature = STANDARD
        .decode(&envelope.signature_value)
        .map_err(|e| SignatureError::MalformedEnvelope(format!("signatureValue: {e}")))?;

    public_key
        .verify(&envelope.signing_input(payload), &signature)
        .map_err(|_| SignatureError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::DidDocument;

    fn identity_with_master() -> (Identity, KeyPair) {
        let mut doc = DidDocument::generate("example").unwrap();
        doc.add_new_key("master").unwrap();
        doc.add_authentication_key("master").unwrap();
        let key = doc.key_pair("master").unwrap();
        (Identity::from_document(doc.safe_document()).unwrap(), key)
    }

    #[test]
    fn test_sign_and_verify() {
        let (identity, key) = identity_with_master();
        let creator = format!("{}#master", identity.did());
        let envelope = sign(&key, creator, b"hello", "covtrace.test");

        assert_eq!(envelope.nonce.len(), 32);
        assert!(verify_envelope(&identity, b"hello", &envelope).is_ok());
        assert_eq!(
            verify_envelope(&identity, b"hello!", &envelope),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_raw_and_value_forms_agree() {
        let (identity, key) = identity_with_master();
        let envelope = sign(&key, "#master", b"payload", "covtrace.test");
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(verify(&identity, b"payload", &bytes).is_ok());
        assert!(verify_value(&identity, b"payload", &value).is_ok());
    }

    #[test]
    fn test_metadata_is_covered() {
        let (identity, key) = identity_with_master();
        let mut envelope = sign(&key, "master", b"payload", "covtrace.test");
        envelope.domain = "evil.example".into();

        assert_eq!(
            verify_envelope(&identity, b"payload", &envelope),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_unknown_creator() {
        let (identity, key) = identity_with_master();
        let envelope = sign(&key, "#other", b"payload", "covtrace.test");

        assert!(matches!(
            verify_envelope(&identity, b"payload", &envelope),
            Err(SignatureError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_foreign_identity_creator_rejected() {
        let (identity, key) = identity_with_master();
        let envelope = sign(&key, "did:example:someone-else#master", b"payload", "d");

        assert!(matches!(
            verify_envelope(&identity, b"payload", &envelope),
            Err(SignatureError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_envelopes() {
        let (identity, _) = identity_with_master();

        assert!(matches!(
            verify(&identity, b"payload", b"not json"),
            Err(SignatureError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            verify_value(&identity, b"payload", &serde_json::json!({"creator": 7})),
            Err(SignatureError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_garbage_signature_value() {
        let (identity, key) = identity_with_master();
        let mut envelope = sign(&key, "#master", b"payload", "d");
        envelope.signature_value = "%%%".into();

        assert!(matches!(
            verify_envelope(&identity, b"payload", &envelope),
            Err(SignatureError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_signing_input_is_length_prefixed() {
        let a = signing_input(b"p", "ab", "c", "n");
        let b = signing_input(b"p", "a", "bc", "n");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32 + 12 + 4);
    }
}
