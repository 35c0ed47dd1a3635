//! REST API for the registrar daemon.
//!
//! Provides HTTP endpoints for:
//! - Health (public)
//! - Duplicate checks, diagnosis and repair
//! - Migration status, runs, export and import
//! - Content writes routed through the lifecycle hooks
//!
//! Everything except `/health` requires the admin token as a bearer
//! credential.

pub mod handlers;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AdminToken;
use crate::config::Config;
use crate::guard::{Allocator, WriteGuard};
use crate::identifier::IdentifierSource;
use crate::oracle::UniquenessOracle;
use crate::reconcile::Reconciler;
use crate::registry::FieldRegistry;
use crate::snapshot::Snapshots;
use crate::store::{RecordStore, Repository};

/// Shared state for API handlers.
pub struct ApiState {
    pub config: Arc<Config>,

    /// Monitored fields, fixed for the life of the process.
    pub registry: Arc<FieldRegistry>,

    pub oracle: UniquenessOracle,

    /// Content write path with the write guard installed.
    pub repository: Repository,

    pub reconciler: Reconciler,

    pub snapshots: Snapshots,

    pub admin_token: AdminToken,
}

impl ApiState {
    /// Wire every component over one store and one identifier source.
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn IdentifierSource>,
        admin_token: AdminToken,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(config.registry());
        let oracle = UniquenessOracle::new(store.clone(), config.validate_uniqueness);
        let allocator = Allocator::new(&config, oracle.clone(), source);

        let guard = WriteGuard::new(config.clone(), registry.clone(), allocator.clone());
        let repository = Repository::new(store.clone()).with_hook(Arc::new(guard));
        let reconciler = Reconciler::new(registry.clone(), store.clone(), allocator);
        let snapshots = Snapshots::new(registry.clone(), store, oracle.clone());

        Self {
            config,
            registry,
            oracle,
            repository,
            reconciler,
            snapshots,
            admin_token,
        }
    }
}

/// Reject requests without a valid `Authorization: Bearer <token>` header.
async fn require_admin(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if state.admin_token.verify(token) => Ok(next.run(request).await),
        _ => Err((StatusCode::UNAUTHORIZED, "Admin token required".to_string())),
    }
}

/// Build the API router with all routes.
pub fn router(state: Arc<ApiState>) -> Router {
    // CORS configuration - allow requests from any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/check-duplicate", post(handlers::identifiers::check_duplicate))
        .route("/diagnose", get(handlers::identifiers::diagnose))
        .route("/autofix", post(handlers::identifiers::autofix))
        .route("/generate-missing", post(handlers::identifiers::generate_missing))
        .route("/models", get(handlers::identifiers::models))
        .route("/stats", get(handlers::identifiers::stats))
        // Migration
        .route("/migration/status", get(handlers::migration::status))
        .route("/migration/run", post(handlers::migration::run))
        .route("/migration/export", get(handlers::migration::export))
        .route("/migration/import", post(handlers::migration::import))
        // Content writes
        .route("/content/:record_type", post(handlers::content::create))
        .route("/content/:record_type/:row_id", put(handlers::content::update))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(handlers::status::health))
        .merge(admin)
        // Middleware
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                // Only log responses that are not 2xx
                .on_request(())
                .on_response(|response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                    let status = response.status();
                    if !status.is_success() {
                        tracing::warn!(
                            status = %status,
                            latency_ms = latency.as_millis(),
                            "request failed"
                        );
                    }
                }),
        )
        .with_state(state)
}

/// Start the API server.
pub async fn serve(state: Arc<ApiState>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    tracing::info!("Registrar API listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
