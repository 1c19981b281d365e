use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "ingestion-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once both stores answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let mongo = state.mongo.health_check().await;
    let postgres = state.postgres.health_check().await;

    match (mongo, postgres) {
        (Ok(()), Ok(())) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        (mongo, postgres) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "mongodb": mongo.err().map(|e| e.to_string()),
                "postgres": postgres.err().map(|e| e.to_string()),
            })),
        ),
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
