//! Error types for DID resolution

use covtrace_core::CoreError;
use thiserror::Error;

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors that can occur while resolving an identifier
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Identifier is not a well-formed DID
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    /// No provider registered for the DID method
    #[error("Unsupported DID method: {0}")]
    UnsupportedMethod(String),

    /// Provider does not know the identifier
    #[error("DID not found: {0}")]
    NotFound(String),

    /// Transport failure talking to a provider
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Provider returned something that is not a usable document
    #[error("Invalid DID document: {0}")]
    InvalidDocument(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::HttpError(err.to_string())
    }
}

impl From<CoreError> for ResolveError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidDid(msg) => ResolveError::InvalidDid(msg),
            other => ResolveError::InvalidDocument(other.to_string()),
        }
    }
}
