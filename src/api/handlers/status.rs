//! Health check handler.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::ApiState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,

    /// Service name.
    pub plugin: String,

    /// Crate version.
    pub version: String,

    pub message: String,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        plugin: "registrar".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        message: format!(
            "Registrar is running with {} monitored fields across {} models",
            state.registry.len(),
            state.registry.record_types().len()
        ),
    })
}
