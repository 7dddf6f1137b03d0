//! Identifier generation for clients that cannot create DIDs locally

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use covtrace_core::{CoreError, DidDocument, MASTER_KEY_ID};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::broker::{TaskMessage, NEW_DID, TASKS_EXCHANGE};

#[derive(Debug, Deserialize)]
pub struct NewIdentifierRequest {
    pub method: String,
    #[serde(default)]
    pub auto_publish: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewIdentifierResponse {
    /// Base64 of the full JSON document, private key included
    pub document: String,
}

fn build_document(method: &str, domain: &str) -> Result<DidDocument, ApiError> {
    let mut document = DidDocument::generate(method).map_err(|e| match e {
        CoreError::InvalidDid(msg) => ApiError::InvalidRequest(format!("invalid method: {msg}")),
        other => ApiError::Internal(other.to_string()),
    })?;
    let internal = |e: CoreError| ApiError::Internal(format!("failed to build document: {e}"));
    document.add_new_key(MASTER_KEY_ID).map_err(internal)?;
    document.add_authentication_key(MASTER_KEY_ID).map_err(internal)?;
    document.add_proof(MASTER_KEY_ID, domain).map_err(internal)?;
    Ok(document)
}

/// Generate a new DID with a master key
///
/// POST /v1/identifier
///
/// With `auto_publish` the document is queued for announcement to the DID
/// directory; a queueing failure is logged and the document still returned.
pub async fn new_identifier(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<NewIdentifierRequest>,
) -> Result<Json<NewIdentifierResponse>, ApiError> {
    let document = build_document(&request.method, &state.config.proof_domain)?;
    let json = serde_json::to_vec(&document)
        .map_err(|e| ApiError::Internal(format!("failed to encode document: {e}")))?;

    if request.auto_publish {
        let message = TaskMessage::json(NEW_DID, &document)
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .persistent();
        match state.publisher.publish(TASKS_EXCHANGE, message).await {
            Ok(true) => info!(did = %document.id, "Queued DID for publication"),
            Ok(false) => warn!(did = %document.id, "Publish request not routed"),
            Err(e) => warn!(did = %document.id, error = %e, "Failed to submit publish request"),
        }
    }

    info!(did = %document.id, auto_publish = request.auto_publish, "Identifier generated");
    Ok(Json(NewIdentifierResponse {
        document: STANDARD.encode(json),
    }))
}
