//! Activation codes

use covtrace_core::{Did, Role};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::storage::{ActivationCode, StorageError, Store};

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Role '{0}' does not use activation codes")]
    RoleNotEligible(Role),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Creates and consumes one-shot activation codes
#[derive(Debug, Clone)]
pub struct RegistrationGate {
    store: Arc<dyn Store>,
}

impl RegistrationGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Issue a fresh code for `(did, role)`, valid for the role's TTL
    pub async fn generate_code(&self, did: &str, role: Role) -> Result<String, RegistrationError> {
        Did::parse(did).map_err(|e| RegistrationError::InvalidDid(e.to_string()))?;
        if role.activation_ttl().is_none() {
            return Err(RegistrationError::RoleNotEligible(role));
        }

        let code = uuid::Uuid::new_v4().to_string();
        self.store
            .insert_activation_code(ActivationCode::new(did, role, code.clone()))
            .await?;

        info!(did = %did, role = %role, "Activation code generated");
        Ok(code)
    }

    /// Consume a code; `false` when absent, already used or expired
    pub async fn consume_code(
        &self,
        did: &str,
        role: Role,
        code: &str,
    ) -> Result<bool, RegistrationError> {
        if role.activation_ttl().is_none() {
            return Ok(false);
        }
        Ok(self.store.consume_activation_code(did, role, code).await?)
    }
}
