//! Error types for the covtrace domain layer

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the covtrace domain layer
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed decentralized identifier
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    /// Role literal outside the supported set
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// DID document is structurally invalid
    #[error("Invalid DID document: {0}")]
    InvalidDocument(String),

    /// Key with the same identifier already present on a document
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Referenced key is not part of the document
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key material could not be decoded or is of the wrong size
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error while handling key material
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<ed25519_dalek::SignatureError> for CoreError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CoreError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}
