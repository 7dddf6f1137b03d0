//! Decentralized identifiers and their documents

use crate::crypto::{KeyPair, PublicKey};
use crate::error::{CoreError, Result};
use crate::signature::{self, SignatureEnvelope, SignatureError};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JSON-LD context of DID documents
pub const DID_CONTEXT: &str = "https://w3id.org/did/v1";

/// Only key type the platform verifies
pub const ED25519_KEY_TYPE: &str = "Ed25519VerificationKey2018";

/// A parsed `did:<method>:<id>` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    method: String,
    id: String,
}

impl Did {
    /// Build an identifier from its parts, validating both
    pub fn new(method: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let method = method.into();
        let id = id.into();

        if method.is_empty()
            || !method
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(CoreError::InvalidDid(format!("invalid method '{method}'")));
        }
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-'))
        {
            return Err(CoreError::InvalidDid(format!("invalid identifier '{id}'")));
        }

        Ok(Self { method, id })
    }

    /// Parse the textual form
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix("did:")
            .ok_or_else(|| CoreError::InvalidDid(format!("missing 'did:' prefix: {value}")))?;
        let (method, id) = rest
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidDid(format!("missing method: {value}")))?;
        Self::new(method, id)
    }

    /// DID method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Method-specific identifier
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method, self.id)
    }
}

impl FromStr for Did {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Public key declared by a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    /// Full key id, `did#fragment`
    pub id: String,

    #[serde(rename = "type")]
    pub key_type: String,

    pub controller: String,

    #[serde(rename = "publicKeyBase64")]
    pub public_key_base64: String,

    /// Only present on documents held by their owner
    #[serde(
        rename = "privateKeyBase64",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key_base64: Option<String>,
}

impl PublicKeyEntry {
    /// Fragment part of the key id
    pub fn fragment(&self) -> Option<&str> {
        self.id.split_once('#').map(|(_, fragment)| fragment)
    }

    /// Decode the declared public key
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_base64(self.id.clone(), &self.public_key_base64)
    }

    /// Decode the private key, when the entry carries one
    pub fn key_pair(&self) -> Result<Option<KeyPair>> {
        self.private_key_base64
            .as_deref()
            .map(|encoded| KeyPair::from_base64(self.id.clone(), encoded))
            .transpose()
    }
}

/// DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,

    pub id: String,

    #[serde(rename = "publicKey", default)]
    pub public_key: Vec<PublicKeyEntry>,

    #[serde(default)]
    pub authentication: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<SignatureEnvelope>,
}

impl DidDocument {
    /// Create an empty document for a fresh `did:<method>:<uuid>`
    pub fn generate(method: &str) -> Result<Self> {
        let did = Did::new(method, uuid::Uuid::new_v4().to_string())?;
        Ok(Self {
            context: vec![DID_CONTEXT.to_string()],
            id: did.to_string(),
            public_key: Vec::new(),
            authentication: Vec::new(),
            proof: None,
        })
    }

    /// Full key id for a fragment name
    pub fn key_id(&self, name: &str) -> String {
        format!("{}#{}", self.id, name)
    }

    /// Look up a key by `did#frag`, `#frag` or bare `frag`
    pub fn key(&self, reference: &str) -> Option<&PublicKeyEntry> {
        let fragment = match reference.split_once('#') {
            Some((prefix, fragment)) => {
                if !prefix.is_empty() && prefix != self.id {
                    return None;
                }
                fragment
            }
            None => reference,
        };
        self.public_key
            .iter()
            .find(|entry| entry.fragment() == Some(fragment))
    }

    /// Generate and register a new Ed25519 key under `name`
    pub fn add_new_key(&mut self, name: &str) -> Result<()> {
        if self.key(name).is_some() {
            return Err(CoreError::DuplicateKey(self.key_id(name)));
        }
        let key_id = self.key_id(name);
        let key = KeyPair::generate(key_id.clone());
        self.public_key.push(PublicKeyEntry {
            id: key_id,
            key_type: ED25519_KEY_TYPE.to_string(),
            controller: self.id.clone(),
            public_key_base64: STANDARD.encode(key.verifying_key_bytes()),
            private_key_base64: Some(STANDARD.encode(key.signing_key_bytes())),
        });
        Ok(())
    }

    /// Mark an existing key as usable for authentication
    pub fn add_authentication_key(&mut self, name: &str) -> Result<()> {
        let key_id = self
            .key(name)
            .map(|entry| entry.id.clone())
            .ok_or_else(|| CoreError::KeyNotFound(self.key_id(name)))?;
        if !self.authentication.contains(&key_id) {
            self.authentication.push(key_id);
        }
        Ok(())
    }

    /// Private key of `name`, which must be held by this document
    pub fn key_pair(&self, name: &str) -> Result<KeyPair> {
        let entry = self
            .key(name)
            .ok_or_else(|| CoreError::KeyNotFound(self.key_id(name)))?;
        entry
            .key_pair()?
            .ok_or_else(|| CoreError::InvalidKeyMaterial(format!("no private key for {}", entry.id)))
    }

    /// Copy of the document without any private key material
    pub fn safe_document(&self) -> DidDocument {
        let mut doc = self.clone();
        for entry in &mut doc.public_key {
            entry.private_key_base64 = None;
        }
        doc
    }

    /// Bytes covered by the document proof
    pub fn proof_payload(&self) -> Result<Vec<u8>> {
        let mut doc = self.safe_document();
        doc.proof = None;
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Self-sign the document with the key `name`
    pub fn add_proof(&mut self, name: &str, domain: &str) -> Result<()> {
        let key = self.key_pair(name)?;
        let payload = self.proof_payload()?;
        self.proof = Some(signature::sign(&key, key.kid(), &payload, domain));
        Ok(())
    }

    /// Verify the self-signed proof against the document's own keys
    pub fn verify_proof(&self) -> std::result::Result<(), SignatureError> {
        let proof = self
            .proof
            .as_ref()
            .ok_or_else(|| SignatureError::MalformedEnvelope("document has no proof".into()))?;
        let payload = self
            .proof_payload()
            .map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))?;
        let identity = Identity::from_document(self.safe_document())
            .map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))?;
        signature::verify_envelope(&identity, &payload, proof)
    }
}

/// A resolved identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    did: Did,
    document: DidDocument,
}

impl Identity {
    /// Wrap a resolved document, validating its identifier
    pub fn from_document(document: DidDocument) -> Result<Self> {
        let did = Did::parse(&document.id)?;
        for entry in &document.public_key {
            match entry.id.split_once('#') {
                Some((prefix, fragment)) if prefix == document.id && !fragment.is_empty() => {}
                _ => {
                    return Err(CoreError::InvalidDocument(format!(
                        "key '{}' is not scoped to {}",
                        entry.id, document.id
                    )))
                }
            }
        }
        Ok(Self { did, document })
    }

    /// Textual DID
    pub fn did(&self) -> String {
        self.did.to_string()
    }

    /// Parsed DID
    pub fn parsed_did(&self) -> &Did {
        &self.did
    }

    /// Underlying document
    pub fn document(&self) -> &DidDocument {
        &self.document
    }

    /// Look up a declared key by reference
    pub fn key(&self, reference: &str) -> Option<&PublicKeyEntry> {
        self.document.key(reference)
    }
}
