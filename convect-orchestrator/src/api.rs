use crate::audit::AuditSink;
use crate::store::RecordStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use convect_common::InstanceStatus;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub audit: Arc<dyn AuditSink>,
}

/// Internal admin surface: health and read-only record listings.
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/instances", get(list_instances))
        .route("/volumes", get(list_volumes))
        .route("/audit", get(recent_audit))
        .with_state(state)
}

async fn root() -> &'static str {
    "Convect Orchestrator Online (Postgres Backed)"
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_instances().await {
        Ok(instances) => {
            let active = instances
                .iter()
                .filter(|i| i.status != InstanceStatus::Terminated)
                .count();
            Json(json!({"status": "ok", "active_instances": active})).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "db_error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn list_instances(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_instances().await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "db_error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn list_volumes(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_volumes().await {
        Ok(volumes) => Json(volumes).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "db_error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn recent_audit(State(state): State<AppState>) -> impl IntoResponse {
    match state.audit.recent(50).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "db_error", "message": e.to_string()})),
        )
            .into_response(),
    }
}
