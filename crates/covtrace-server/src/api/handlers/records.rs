//! Liveness ping and location record submission

use axum::{extract::State, Json};
use covtrace_core::{LocationRecord, RecordBatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{authorize, AppState};
use crate::api::error::ApiError;
use crate::api::extract::{ApiJson, BearerToken};
use crate::auth::RECORD_RESOURCE;

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// GET /v1/ping
pub async fn ping() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    #[serde(default)]
    pub records: Vec<LocationRecord>,
}

/// Queue a batch of location records for validation
///
/// POST /v1/record
///
/// `ok` reports whether the task queue accepted the batch, not whether the
/// records are valid; invalid records are dropped later by the worker.
pub async fn record(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    payload: Result<ApiJson<RecordRequest>, ApiError>,
) -> Result<Json<OkResponse>, ApiError> {
    let claims = authorize(&state, &token, RECORD_RESOURCE, "create", true)?;
    let ApiJson(request) = payload?;
    let batch = RecordBatch::new(request.records);
    let ok = state.ingest.accept(&claims, &batch).await?;
    Ok(Json(OkResponse { ok }))
}
