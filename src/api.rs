//! HTTP control API
//!
//! Thin axum handlers over [`DrService`]. Errors are rendered as
//! `{"error": ..., "category": ...}` with a status derived from the error
//! category.

use crate::error::{DrError, ErrorCategory};
use crate::service::{DrService, ProtectRequest};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use drlogic_core_registry::{EntityFilter, ProtectedEntity, RecoveryTask, Unregistered};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DrService>,
}

/// Error response of every handler
#[derive(Debug)]
pub struct ApiError(DrError);

impl From<DrError> for ApiError {
    fn from(err: DrError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Consistency => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::DriverTransient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::DriverPermanent => StatusCode::BAD_GATEWAY,
            ErrorCategory::InvariantViolation
            | ErrorCategory::Configuration
            | ErrorCategory::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API request failed: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "category": self.0.category().to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct UnprotectResponse {
    pub id: String,
    /// False when the entity was not registered
    pub removed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryAccepted {
    pub task_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecoveryQuery {
    pub site: Option<String>,
}

/// Build the API router
pub fn router(service: Arc<DrService>) -> Router {
    Router::new()
        .route("/api/entities", post(protect_entity).get(list_entities))
        .route("/api/entities/:id", get(get_entity).delete(unprotect_entity))
        .route("/api/sites/:site/recover", post(trigger_recovery))
        .route("/api/recoveries", get(list_recoveries))
        .route("/api/recoveries/:id", get(recovery_status))
        .route("/api/recoveries/:id/cancel", post(cancel_recovery))
        .route(
            "/api/health",
            get(|| async {
                Json(serde_json::json!({
                    "status": "ok",
                    "service": "drlogic",
                    "version": crate::VERSION,
                }))
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn protect_entity(
    State(state): State<AppState>,
    Json(request): Json<ProtectRequest>,
) -> ApiResult<(StatusCode, Json<ProtectedEntity>)> {
    let entity = state.service.protect(request).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn list_entities(
    State(state): State<AppState>,
    Query(filter): Query<EntityFilter>,
) -> ApiResult<Json<Vec<ProtectedEntity>>> {
    Ok(Json(state.service.entities(&filter).await?))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProtectedEntity>> {
    Ok(Json(state.service.entity(&id).await?))
}

async fn unprotect_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UnprotectResponse>> {
    let removed = match state.service.unprotect(&id).await? {
        Unregistered::Removed(_) => true,
        Unregistered::NotFound => false,
    };
    Ok(Json(UnprotectResponse { id, removed }))
}

async fn trigger_recovery(
    State(state): State<AppState>,
    Path(site): Path<String>,
) -> ApiResult<(StatusCode, Json<RecoveryAccepted>)> {
    let task_id = state.service.trigger_recovery(&site).await?;
    Ok((StatusCode::ACCEPTED, Json(RecoveryAccepted { task_id })))
}

async fn list_recoveries(
    State(state): State<AppState>,
    Query(query): Query<RecoveryQuery>,
) -> ApiResult<Json<Vec<RecoveryTask>>> {
    Ok(Json(state.service.recoveries(query.site.as_deref()).await?))
}

async fn recovery_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RecoveryTask>> {
    Ok(Json(state.service.recovery_status(&id).await?))
}

async fn cancel_recovery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.cancel_recovery(&id).await?;
    Ok(StatusCode::ACCEPTED)
}
