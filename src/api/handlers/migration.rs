//! Migration status, runs, export and import.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{default_true, optional_body, snapshot_error, store_error};
use crate::api::ApiState;
use crate::reconcile::{FixOptions, MigrationStatus, ReconciliationResult};
use crate::snapshot::{ImportOptions, ImportResult, Mappings};

/// Issue counts per monitored field.
pub async fn status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<MigrationStatus>, (StatusCode, String)> {
    let status = state.reconciler.status().await.map_err(store_error)?;
    Ok(Json(status))
}

/// Run a reconciliation. Defaults to a dry run over every category.
pub async fn run(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<ReconciliationResult>, (StatusCode, String)> {
    let options: FixOptions = optional_body(&body)?;
    let result = state.reconciler.fix(options).await.map_err(store_error)?;
    Ok(Json(result))
}

/// Download every mapping as a JSON file.
pub async fn export(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let snapshot = state.snapshots.export().await.map_err(snapshot_error)?;

    let disposition = format!(
        "attachment; filename=\"registrar-export-{}.json\"",
        snapshot.exported_at.format("%Y%m%dT%H%M%SZ")
    );

    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(snapshot)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub mappings: Mappings,

    #[serde(default = "default_true")]
    pub dry_run: bool,

    #[serde(default)]
    pub overwrite: bool,
}

/// Apply mappings from an earlier export.
pub async fn import(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ImportRequest>,
) -> Json<ImportResult> {
    let options = ImportOptions {
        dry_run: req.dry_run,
        overwrite: req.overwrite,
    };
    Json(state.snapshots.import(&req.mappings, options).await)
}
