//! In-memory resolution provider

use async_trait::async_trait;
use covtrace_core::{Did, DidDocument, Identity};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ResolveError, Result};
use crate::registry::DidResolver;

/// Serves documents registered in-process
pub struct MemoryResolver {
    method: String,
    documents: RwLock<HashMap<String, DidDocument>>,
}

impl MemoryResolver {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Register a document; private keys are stripped before storing
    pub fn insert(&self, document: &DidDocument) {
        let safe = document.safe_document();
        self.documents.write().unwrap().insert(safe.id.clone(), safe);
    }

    /// Add a document (builder style)
    pub fn with_document(self, document: &DidDocument) -> Self {
        self.insert(document);
        self
    }

    /// Forget a document
    pub fn remove(&self, did: &str) -> bool {
        self.documents.write().unwrap().remove(did).is_some()
    }
}

#[async_trait]
impl DidResolver for MemoryResolver {
    fn method(&self) -> &str {
        &self.method
    }

    fn description(&self) -> &str {
        "in-memory did resolver"
    }

    async fn resolve(&self, did: &Did) -> Result<Identity> {
        let key = did.to_string();
        let document = self
            .documents
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(ResolveError::NotFound(key))?;
        Ok(Identity::from_document(document)?)
    }
}
