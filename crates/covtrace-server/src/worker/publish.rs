//! Announcing new identities to an external DID directory
//!
//! The directory accepts a publish ticket only when it carries a
//! proof-of-work solution signed by the document's own master key.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use covtrace_core::{DidDocument, Identity, MASTER_KEY_ID};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directory endpoint used when none is configured
pub const DEFAULT_DIRECTORY_ENDPOINT: &str = "https://did.bryk.io/v1/process";

/// Leading zero bits required of a ticket solution
pub const DEFAULT_DIFFICULTY: u32 = 18;

/// Digest width; harder targets can never be met
pub const MAX_DIFFICULTY: u32 = 256;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Document error: {0}")]
    Document(#[from] covtrace_core::CoreError),

    #[error("Proof of work aborted: {0}")]
    Solve(String),

    #[error("Directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory rejected ticket with status {0}")]
    Rejected(u16),
}

/// Publishes DID documents to a directory
#[async_trait]
pub trait DirectoryPublisher: Send + Sync + std::fmt::Debug {
    /// Announce `document`; the document must hold its master private key
    async fn publish(&self, document: &DidDocument) -> Result<(), PublishError>;
}

/// A proof-of-work publish ticket
#[derive(Debug, Clone, Serialize)]
pub struct PublishTicket {
    pub timestamp: i64,
    #[serde(rename = "nonce")]
    pub nonce_value: i64,
    pub key_id: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl PublishTicket {
    /// Unsolved ticket for a safe document
    pub fn new(key_id: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            nonce_value: 0,
            key_id: key_id.into(),
            content,
            signature: Vec::new(),
        }
    }

    /// `timestamp | nonce | hex(key_id) | content`, integers little endian
    pub fn encode(&self) -> Vec<u8> {
        let key_id = hex::encode(self.key_id.as_bytes());
        let mut out = Vec::with_capacity(16 + key_id.len() + self.content.len());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.nonce_value.to_le_bytes());
        out.extend_from_slice(key_id.as_bytes());
        out.extend_from_slice(&self.content);
        out
    }

    /// Search nonces until the digest has `difficulty` leading zero bits.
    ///
    /// Leaves the winning nonce on the ticket and returns the digest.
    pub fn solve(&mut self, difficulty: u32) -> [u8; 32] {
        self.nonce_value = 0;
        loop {
            let digest: [u8; 32] = Sha256::digest(self.encode()).into();
            if leading_zero_bits(&digest) >= difficulty {
                return digest;
            }
            self.nonce_value += 1;
        }
    }
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Build, solve and sign a ticket for `document`
pub async fn prepare_ticket(document: &DidDocument, difficulty: u32) -> Result<PublishTicket, PublishError> {
    let key = document.key_pair(MASTER_KEY_ID)?;
    let content = serde_json::to_vec(&document.safe_document())
        .map_err(covtrace_core::CoreError::from)?;
    let mut ticket = PublishTicket::new(MASTER_KEY_ID, content);

    let (mut ticket, solution) = tokio::task::spawn_blocking(move || {
        let solution = ticket.solve(difficulty);
        (ticket, solution)
    })
    .await
    .map_err(|e| PublishError::Solve(e.to_string()))?;

    ticket.signature = key.sign(&solution).to_vec();
    Ok(ticket)
}

/// Publishes through the proof-of-work directory API
#[derive(Debug, Clone)]
pub struct PowDirectoryPublisher {
    client: reqwest::Client,
    endpoint: String,
    difficulty: u32,
}

impl PowDirectoryPublisher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            difficulty: DEFAULT_DIFFICULTY,
        })
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    task: u8,
    ticket: &'a PublishTicket,
}

#[async_trait]
impl DirectoryPublisher for PowDirectoryPublisher {
    async fn publish(&self, document: &DidDocument) -> Result<(), PublishError> {
        let started = std::time::Instant::now();
        let ticket = prepare_ticket(document, self.difficulty).await?;
        debug!(
            did = %document.id,
            nonce = ticket.nonce_value,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Publish ticket solved"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&PublishRequest { task: 0, ticket: &ticket })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }
        info!(did = %document.id, "DID published to directory");
        Ok(())
    }
}

/// Drops publish requests
#[derive(Debug, Clone, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl DirectoryPublisher for DisabledPublisher {
    async fn publish(&self, document: &DidDocument) -> Result<(), PublishError> {
        warn!(did = %document.id, "Directory publishing disabled, dropping request");
        Ok(())
    }
}

/// Check a ticket's signature against the identity named by its content
pub fn verify_ticket(ticket: &PublishTicket) -> Result<bool, PublishError> {
    let document: DidDocument =
        serde_json::from_slice(&ticket.content).map_err(covtrace_core::CoreError::from)?;
    let identity = Identity::from_document(document)?;
    let Some(entry) = identity.key(&ticket.key_id) else {
        return Ok(false);
    };
    let digest: [u8; 32] = Sha256::digest(ticket.encode()).into();
    Ok(entry.public_key()?.verify(&digest, &ticket.signature).is_ok())
}

mod base64_bytes {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> DidDocument {
        let mut doc = DidDocument::generate("bryk").unwrap();
        doc.add_new_key(MASTER_KEY_ID).unwrap();
        doc.add_authentication_key(MASTER_KEY_ID).unwrap();
        doc
    }

    #[test]
    fn test_ticket_encoding_layout() {
        let mut ticket = PublishTicket::new("master", b"{}".to_vec());
        ticket.timestamp = 1;
        ticket.nonce_value = 2;

        let encoded = ticket.encode();
        assert_eq!(&encoded[0..8], &1i64.to_le_bytes());
        assert_eq!(&encoded[8..16], &2i64.to_le_bytes());
        assert_eq!(&encoded[16..28], b"6d6173746572");
        assert_eq!(&encoded[28..], b"{}");
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0, 0, 0xff]), 16);
        assert_eq!(leading_zero_bits(&[0, 0x10]), 11);
        assert_eq!(leading_zero_bits(&[0x80]), 0);
    }

    #[test]
    fn test_solve_meets_difficulty() {
        let mut ticket = PublishTicket::new("master", b"content".to_vec());
        let digest = ticket.solve(8);

        assert!(leading_zero_bits(&digest) >= 8);
        let recomputed: [u8; 32] = Sha256::digest(ticket.encode()).into();
        assert_eq!(recomputed, digest);
    }

    #[tokio::test]
    async fn test_prepared_ticket_verifies() {
        let doc = document();
        let ticket = prepare_ticket(&doc, 4).await.unwrap();

        assert_eq!(ticket.key_id, MASTER_KEY_ID);
        assert!(!String::from_utf8_lossy(&ticket.content).contains("privateKeyBase64"));
        assert!(verify_ticket(&ticket).unwrap());

        let mut tampered = ticket.clone();
        tampered.nonce_value += 1;
        assert!(!verify_ticket(&tampered).unwrap());
    }

    #[test]
    fn test_request_shape() {
        let ticket = PublishTicket::new("master", b"x".to_vec());
        let value = serde_json::to_value(PublishRequest { task: 0, ticket: &ticket }).unwrap();

        assert_eq!(value["task"], 0);
        assert_eq!(value["ticket"]["key_id"], "master");
        assert_eq!(value["ticket"]["nonce"], 0);
        assert_eq!(value["ticket"]["content"], "eA==");
    }

    #[tokio::test]
    async fn test_ticket_requires_private_key() {
        let doc = document().safe_document();
        assert!(matches!(
            prepare_ticket(&doc, 1).await,
            Err(PublishError::Document(_))
        ));
    }
}
