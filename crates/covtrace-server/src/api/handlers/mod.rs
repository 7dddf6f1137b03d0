//! API request handlers

pub mod credentials;
pub mod identifiers;
pub mod records;

pub use credentials::{
    activation_code, credentials, renew_credentials, ActivationCodeRequest, ActivationCodeResponse,
    CredentialsRequest, CredentialsResponse, RenewRequest,
};
pub use identifiers::{new_identifier, NewIdentifierRequest, NewIdentifierResponse};
pub use records::{ping, record, OkResponse, RecordRequest};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use covtrace_core::{CredentialClaims, Role};
use std::sync::Arc;
use tracing::warn;

use crate::api::error::ApiError;
use crate::auth::{AccessEnforcer, CredentialAuthority, RegistrationGate};
use crate::broker::Publisher;
use crate::ingest::RecordIngestPipeline;
use crate::storage::Store;

/// Server settings visible to handlers
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Domain stamped on document proofs
    pub proof_domain: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            proof_domain: "covtrace.local".into(),
        }
    }
}

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub authority: CredentialAuthority,
    pub enforcer: AccessEnforcer,
    pub registration: RegistrationGate,
    pub ingest: RecordIngestPipeline,
    pub publisher: Arc<dyn Publisher>,
    pub store: Arc<dyn Store>,
    pub config: ApiConfig,
}

/// Token from an `Authorization: Bearer` header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthenticated("missing authorization header".into()))?
        .to_str()
        .map_err(|_| ApiError::Unauthenticated("malformed authorization header".into()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| ApiError::Unauthenticated("malformed authorization header".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ApiError::Unauthenticated("bearer token required".into()));
    }
    Ok(token.trim())
}

/// Authenticate `token` and check it may perform `action` on `resource`
pub(crate) fn authorize(
    state: &AppState,
    token: &str,
    resource: &str,
    action: &str,
    check_expiration: bool,
) -> Result<CredentialClaims, ApiError> {
    let claims = state
        .authority
        .authenticate(token, check_expiration)
        .map_err(|e| ApiError::Unauthenticated(e.to_string()))?;

    if !state.enforcer.evaluate(claims.role, resource, action) {
        warn!(did = %claims.did, role = %claims.role, resource, action, "Access denied");
        return Err(ApiError::Unauthorized(format!(
            "role '{}' may not {} {}",
            claims.role, action, resource
        )));
    }
    Ok(claims)
}

/// Parse a role name from a request body
pub(crate) fn parse_role(role: &str) -> Result<Role, ApiError> {
    role.parse::<Role>()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))
}
