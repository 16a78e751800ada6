/**
 * API REST VIGIL - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose l'ingestion et les lectures de métriques aux agents et aux vues.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, sérialisation JSON automatique
 * - Routes : /health, /system/health, /metrics/ingest, /metrics/tail, /metrics/hosts
 * - Identité appelant lue dans les headers x-user-id / x-session-id
 * - Erreurs métier → 401 (identité), 422 (batch trop gros ou corps/query
 *   illisible), 500 (store), toujours en JSON {"error"}
 *
 * SÉCURITÉ :
 * - Si VIGIL_API_KEY est défini, header x-api-key obligatoire sauf /health
 * - Ce secret protège le transport, l'isolation se fait par owner
 */

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use std::sync::Arc;
use tracing::warn;

use crate::health::{HealthTracker, KernelHealth};
use crate::identity::{resolve_owner, CallerContext};
use crate::models::{IngestRequest, IngestResponse, StoredSample, TailParams};
use crate::service::{MetricsService, ServiceError};

#[derive(Clone)]
pub struct AppState {
    pub service: MetricsService,
    pub health_tracker: HealthTracker,
    pub api_key: Option<Arc<str>>,
}

/// Erreur HTTP construite depuis une erreur métier
pub struct ApiError(ServiceError);

/// Extracteur rejeté : l'identité passe avant le contenu
fn rejected(ctx: &CallerContext, detail: String) -> ApiError {
    match resolve_owner(ctx) {
        Err(e) => e.into(),
        Ok(_) => ServiceError::Validation(detail).into(),
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Store(e) => {
                warn!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request with missing or wrong api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/metrics/ingest", post(ingest))
        .route("/metrics/tail", get(tail))
        .route("/metrics/hosts", get(hosts))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// POST /metrics/ingest
async fn ingest(
    State(app): State<AppState>,
    ctx: CallerContext,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            app.health_tracker.record_rejected();
            return Err(rejected(&ctx, rejection.body_text()));
        }
    };
    match app.service.ingest(&ctx, &req.host, req.samples) {
        Ok(resp) => {
            app.health_tracker.record_accepted(resp.inserted);
            Ok(Json(resp))
        }
        Err(e) => {
            app.health_tracker.record_rejected();
            Err(e.into())
        }
    }
}

// GET /metrics/tail?host=..&sinceMs=..&limit=..
async fn tail(
    State(app): State<AppState>,
    ctx: CallerContext,
    params: Result<Query<TailParams>, QueryRejection>,
) -> Result<Json<Vec<StoredSample>>, ApiError> {
    let Query(params) = params.map_err(|rejection| rejected(&ctx, rejection.body_text()))?;
    let samples = app.service.tail(&ctx, &params.host, params.since_ms, params.limit)?;
    Ok(Json(samples))
}

// GET /metrics/hosts
async fn hosts(State(app): State<AppState>, ctx: CallerContext) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(app.service.hosts(&ctx)?))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(app.service.store().as_ref()))
}
