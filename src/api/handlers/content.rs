//! Content writes. Every create and update passes through the lifecycle
//! hooks before it reaches the store.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::write_error;
use crate::api::ApiState;
use crate::store::{FieldMap, RecordIdentity, RowId, StoredRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Identity shared with existing revisions, if any.
    pub record_identity: Option<RecordIdentity>,

    #[serde(default)]
    pub data: FieldMap,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub data: FieldMap,
}

fn known_type(state: &ApiState, record_type: &str) -> Result<(), (StatusCode, String)> {
    if state.config.content_types.iter().any(|s| s.uid == record_type) {
        Ok(())
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Unknown content type: {}", record_type),
        ))
    }
}

/// Create a record.
pub async fn create(
    State(state): State<Arc<ApiState>>,
    Path(record_type): Path<String>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<StoredRecord>), (StatusCode, String)> {
    known_type(&state, &record_type)?;

    let record = state
        .repository
        .create(&record_type, req.record_identity, req.data)
        .await
        .map_err(write_error)?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// Patch one stored row.
pub async fn update(
    State(state): State<Arc<ApiState>>,
    Path((record_type, row_id)): Path<(String, u64)>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<StoredRecord>, (StatusCode, String)> {
    known_type(&state, &record_type)?;

    let record = state
        .repository
        .update(&record_type, RowId(row_id), req.data)
        .await
        .map_err(write_error)?;

    Ok(Json(record))
}
