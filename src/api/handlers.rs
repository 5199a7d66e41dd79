use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let response = RootResponse {
        message: "Mentor notification service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        progress_url: format!("{}/progress", state.settings().api_v1_str()),
    };

    Json(response)
}

pub(crate) async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut components = HashMap::new();

    let status = match state.store().ping().await {
        Ok(()) => {
            components.insert("database".to_string(), "healthy".to_string());
            StatusCode::OK
        }
        Err(err) => {
            components.insert("database".to_string(), format!("unhealthy: {err}"));
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let label = if status == StatusCode::OK { "healthy" } else { "unhealthy" };
    (
        status,
        Json(HealthResponse {
            service: "mentor-notify".to_string(),
            status: label.to_string(),
            components,
        }),
    )
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
