//! Resolver registry - routes identifiers to method providers

use async_trait::async_trait;
use covtrace_core::{Did, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ResolveError, Result};

/// Trait for DID method providers
///
/// Each provider resolves identifiers of a single DID method into an
/// [`Identity`].
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// DID method handled by this provider
    fn method(&self) -> &str;

    /// Resolve an identifier of this provider's method
    async fn resolve(&self, did: &Did) -> Result<Identity>;

    /// Get a description of this provider (for logging)
    fn description(&self) -> &str {
        "did resolver"
    }
}

/// Routes identifiers to the provider registered for their method
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    providers: HashMap<String, Arc<dyn DidResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl ResolverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the same method
    pub fn register<R: DidResolver + 'static>(&mut self, provider: R) {
        self.register_arc(Arc::new(provider));
    }

    /// Register a shared provider
    pub fn register_arc(&mut self, provider: Arc<dyn DidResolver>) {
        let method = provider.method().to_string();
        info!(
            method = %method,
            description = provider.description(),
            "Registered DID resolver"
        );
        self.providers.insert(method, provider);
    }

    /// Add a provider (builder style)
    pub fn with_provider<R: DidResolver + 'static>(mut self, provider: R) -> Self {
        self.register(provider);
        self
    }

    /// Check if a provider is registered for a method
    pub fn supports(&self, method: &str) -> bool {
        self.providers.contains_key(method)
    }

    /// List all registered methods
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.providers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Resolve a textual DID
    ///
    /// The returned identity is guaranteed to describe exactly `did`.
    pub async fn resolve(&self, did: &str) -> Result<Identity> {
        let parsed = Did::parse(did)?;
        let provider = self.providers.get(parsed.method()).ok_or_else(|| {
            warn!(method = %parsed.method(), "No resolver for DID method");
            ResolveError::UnsupportedMethod(parsed.method().to_string())
        })?;

        let identity = provider.resolve(&parsed).await?;
        if identity.parsed_did() != &parsed {
            return Err(ResolveError::InvalidDocument(format!(
                "requested {} but provider returned {}",
                parsed,
                identity.did()
            )));
        }

        debug!(did = %parsed, keys = identity.document().public_key.len(), "DID resolved");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covtrace_core::DidDocument;

    struct StaticResolver {
        document: DidDocument,
    }

    #[async_trait]
    impl DidResolver for StaticResolver {
        fn method(&self) -> &str {
            "bryk"
        }

        async fn resolve(&self, _did: &Did) -> Result<Identity> {
            Ok(Identity::from_document(self.document.clone())?)
        }
    }

    fn document() -> DidDocument {
        let mut doc = DidDocument::generate("bryk").unwrap();
        doc.add_new_key("master").unwrap();
        doc.safe_document()
    }

    #[tokio::test]
    async fn test_registry_routing() {
        let doc = document();
        let registry = ResolverRegistry::new().with_provider(StaticResolver {
            document: doc.clone(),
        });

        assert!(registry.supports("bryk"));
        assert_eq!(registry.methods(), vec!["bryk".to_string()]);

        let identity = registry.resolve(&doc.id).await.unwrap();
        assert_eq!(identity.did(), doc.id);
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let registry = ResolverRegistry::new().with_provider(StaticResolver { document: document() });
        let result = registry.resolve("did:web:example.com").await;
        assert!(matches!(result, Err(ResolveError::UnsupportedMethod(m)) if m == "web"));
    }

    #[tokio::test]
    async fn test_invalid_did() {
        let registry = ResolverRegistry::new();
        assert!(matches!(
            registry.resolve("not-a-did").await,
            Err(ResolveError::InvalidDid(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_returning_other_identity() {
        let registry = ResolverRegistry::new().with_provider(StaticResolver { document: document() });
        let result = registry.resolve("did:bryk:someone-else").await;
        assert!(matches!(result, Err(ResolveError::InvalidDocument(_))));
    }
}
