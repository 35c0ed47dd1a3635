//! Duplicate checks, diagnosis and one-category repairs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::{optional_body, store_error, DryRunRequest};
use crate::api::ApiState;
use crate::reconcile::{DiagnosisReport, FixOptions, ReconciliationResult, Stats};
use crate::store::RecordIdentity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDuplicateRequest {
    pub content_type: String,
    pub field: String,
    pub uuid: String,
    pub exclude_document_id: Option<RecordIdentity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDuplicateResponse {
    pub exists: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<RecordIdentity>,
}

/// Whether a value is well-formed and already held by another record.
pub async fn check_duplicate(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CheckDuplicateRequest>,
) -> Result<Json<CheckDuplicateResponse>, (StatusCode, String)> {
    let field = state.registry.get(&req.content_type, &req.field).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Field not monitored: {}.{}", req.content_type, req.field),
        )
    })?;

    let ownership = state
        .oracle
        .exists(
            &req.content_type,
            &req.field,
            &req.uuid,
            req.exclude_document_id.as_ref(),
        )
        .await
        .map_err(store_error)?;

    Ok(Json(CheckDuplicateResponse {
        exists: ownership.exists,
        valid: field.is_valid(&req.uuid),
        owner: ownership.owner,
    }))
}

/// Duplicate groups per monitored field.
pub async fn diagnose(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<DiagnosisReport>, (StatusCode, String)> {
    let report = state.reconciler.diagnose().await.map_err(store_error)?;
    Ok(Json(report))
}

/// Resolve duplicates only.
pub async fn autofix(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ReconciliationResult>, (StatusCode, String)> {
    let req: DryRunRequest = optional_body(&body)?;
    let result = state
        .reconciler
        .fix(FixOptions::duplicates_only(req.dry_run))
        .await
        .map_err(store_error)?;
    Ok(Json(result))
}

/// Fill empty values only.
pub async fn generate_missing(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ReconciliationResult>, (StatusCode, String)> {
    let req: DryRunRequest = optional_body(&body)?;
    let result = state
        .reconciler
        .fix(FixOptions::empty_only(req.dry_run))
        .await
        .map_err(store_error)?;
    Ok(Json(result))
}

/// Monitored field names per record type.
pub async fn models(State(state): State<Arc<ApiState>>) -> Json<BTreeMap<String, Vec<String>>> {
    Json(state.registry.models())
}

/// Aggregate counts across models.
pub async fn stats(State(state): State<Arc<ApiState>>) -> Result<Json<Stats>, (StatusCode, String)> {
    let stats = state.reconciler.stats().await.map_err(store_error)?;
    Ok(Json(stats))
}
