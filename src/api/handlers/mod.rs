//! API request handlers.

pub mod content;
pub mod identifiers;
pub mod migration;
pub mod status;

use axum::{body::Bytes, http::StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

use crate::guard::GuardError;
use crate::snapshot::SnapshotError;
use crate::store::{StoreError, WriteError};

/// Body of the single-flag repair endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunRequest {
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

impl Default for DryRunRequest {
    fn default() -> Self {
        Self { dry_run: true }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

/// Parse a JSON body that may be left out entirely.
///
/// An empty body yields the defaults. Anything else must parse.
pub(crate) fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, (StatusCode, String)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        let status = if e.is_data() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, format!("Invalid request body: {e}"))
    })
}

pub(crate) fn store_error(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::RowNotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        other => {
            tracing::error!(error = %other, "Store request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub(crate) fn write_error(e: WriteError) -> (StatusCode, String) {
    match e {
        WriteError::Rejected(GuardError::Validation { .. }) => (StatusCode::BAD_REQUEST, e.to_string()),
        WriteError::Rejected(GuardError::GenerationExhausted { .. }) => (StatusCode::CONFLICT, e.to_string()),
        WriteError::Rejected(GuardError::Store(inner)) | WriteError::Store(inner) => store_error(inner),
    }
}

pub(crate) fn snapshot_error(e: SnapshotError) -> (StatusCode, String) {
    match e {
        SnapshotError::Store(inner) => store_error(inner),
        other => (StatusCode::BAD_REQUEST, other.to_string()),
    }
}
