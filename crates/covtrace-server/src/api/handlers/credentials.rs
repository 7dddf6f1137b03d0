//! Activation codes and credential issuance
//!
//! - `POST /v1/activation_code`: open for users, agents need an authorized credential
//! - `POST /v1/credentials`: exchange a signed activation code for a credential
//! - `POST /v1/credentials/renew`: renew a possibly expired credential

use axum::{extract::State, http::HeaderMap, Json};
use covtrace_core::Role;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{authorize, bearer_token, parse_role, AppState};
use crate::api::error::ApiError;
use crate::api::extract::{ApiJson, BearerToken};
use crate::auth::{
    Credential, CredentialRequest, IssueOptions, AGENT_CODE_RESOURCE, CREDENTIALS_RESOURCE,
};

#[derive(Debug, Deserialize)]
pub struct ActivationCodeRequest {
    pub did: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivationCodeResponse {
    pub activation_code: String,
}

/// Generate an activation code
///
/// POST /v1/activation_code
pub async fn activation_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<ActivationCodeRequest>,
) -> Result<Json<ActivationCodeResponse>, ApiError> {
    let role = parse_role(&request.role)?;
    match role {
        Role::User => {}
        Role::Agent => {
            let token = bearer_token(&headers)?;
            let claims = authorize(&state, token, AGENT_CODE_RESOURCE, "create", true)?;
            info!(issuer = %claims.did, did = %request.did, "Agent activation code requested");
        }
        Role::Admin => {
            warn!(did = %request.did, "Rejected activation code request for admin role");
            return Err(ApiError::InvalidRequest(
                "activation codes for role 'admin' cannot be requested".into(),
            ));
        }
    }

    let activation_code = state.registration.generate_code(&request.did, role).await?;
    Ok(Json(ActivationCodeResponse { activation_code }))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub did: String,
    pub role: String,
    pub activation_code: String,
    pub proof: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub access_token: String,
    pub refresh_code: String,
}

impl From<Credential> for CredentialsResponse {
    fn from(credential: Credential) -> Self {
        Self {
            access_token: credential.access_token,
            refresh_code: credential.refresh_code,
        }
    }
}

/// Issue a credential
///
/// POST /v1/credentials
pub async fn credentials(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CredentialsRequest>,
) -> Result<Json<CredentialsResponse>, ApiError> {
    let request = CredentialRequest {
        role: parse_role(&request.role)?,
        did: request.did,
        activation_code: request.activation_code,
        proof: request.proof,
    };

    let credential = state.authority.issue(&request, IssueOptions::strict()).await?;
    Ok(Json(credential.into()))
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub refresh_code: String,
}

/// Renew a credential; the bearer token may be expired
///
/// POST /v1/credentials/renew
pub async fn renew_credentials(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    payload: Result<ApiJson<RenewRequest>, ApiError>,
) -> Result<Json<CredentialsResponse>, ApiError> {
    authorize(&state, &token, CREDENTIALS_RESOURCE, "renew", false)?;
    let ApiJson(request) = payload?;
    let credential = state.authority.renew(&token, &request.refresh_code)?;
    Ok(Json(credential.into()))
}
