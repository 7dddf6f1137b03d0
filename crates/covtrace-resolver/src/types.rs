//! Provider configuration

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the full DID in endpoint templates
pub const DID_PLACEHOLDER: &str = "{did}";

/// Configuration of an HTTP resolution provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// DID method served by the provider (e.g. "bryk")
    pub method: String,

    /// URL template containing `{did}`
    pub endpoint: String,

    /// Seconds a resolved document stays cached
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum cached documents
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_timeout() -> u64 {
    10
}

impl ProviderConfig {
    /// Create a provider configuration with default cache settings
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set the cache TTL
    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// URL to fetch for `did`
    ///
    /// A placeholder inside the query string is percent-encoded; in the path
    /// the DID is inserted as is.
    pub fn url_for(&self, did: &str) -> String {
        match self.endpoint.find(DID_PLACEHOLDER) {
            Some(at) if self.endpoint[..at].contains('?') => self
                .endpoint
                .replace(DID_PLACEHOLDER, &urlencoding::encode(did)),
            Some(_) => self.endpoint.replace(DID_PLACEHOLDER, did),
            None => format!("{}/{}", self.endpoint.trim_end_matches('/'), did),
        }
    }
}
