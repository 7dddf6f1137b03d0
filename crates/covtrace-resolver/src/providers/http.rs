//! HTTP resolution provider
//!
//! Fetches DID documents from a resolution endpoint and caches the
//! resulting identities.

use async_trait::async_trait;
use covtrace_core::{Did, DidDocument, Identity};
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{ResolveError, Result};
use crate::registry::DidResolver;
use crate::types::ProviderConfig;

/// Resolution endpoints either return the document itself or wrap it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResolutionResponse {
    Wrapped { document: DidDocument },
    Bare(DidDocument),
}

impl ResolutionResponse {
    fn into_document(self) -> DidDocument {
        match self {
            ResolutionResponse::Wrapped { document } => document,
            ResolutionResponse::Bare(document) => document,
        }
    }
}

/// HTTP DID resolver
pub struct HttpResolver {
    config: ProviderConfig,
    /// Resolved identities (did -> identity)
    cache: Cache<String, Identity>,
    http_client: reqwest::Client,
}

impl HttpResolver {
    /// Create a resolver for the configured endpoint
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                .max_capacity(config.cache_capacity)
                .build(),
            config,
            http_client,
        })
    }

    /// Number of cached identities
    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }

    async fn fetch(&self, did: &Did) -> Result<Identity> {
        let did_string = did.to_string();
        let url = self.config.url_for(&did_string);
        debug!(did = %did_string, url = %url, "Fetching DID document");

        let response = self.http_client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(did_string));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ResolveError::HttpError(e.to_string()))?;

        let body: ResolutionResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidDocument(e.to_string()))?;

        Ok(Identity::from_document(body.into_document())?)
    }
}

#[async_trait]
impl DidResolver for HttpResolver {
    fn method(&self) -> &str {
        &self.config.method
    }

    fn description(&self) -> &str {
        "http did resolver"
    }

    async fn resolve(&self, did: &Did) -> Result<Identity> {
        let key = did.to_string();
        if let Some(cached) = self.cache.get(&key).await {
            debug!(did = %key, "Using cached DID document");
            return Ok(cached);
        }

        let identity = self.fetch(did).await?;
        self.cache.insert(key, identity.clone()).await;
        Ok(identity)
    }
}
