use std::time::Instant;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;

use crate::{application::error::ErrorReport, util::timestamp::now_rfc3339};

use super::HttpState;

#[derive(Debug, Serialize)]
struct DeploymentView {
    mode: String,
    cache: &'static str,
    secrets: &'static str,
    workers: &'static str,
    database: &'static str,
    fallbacks: usize,
}

pub(super) async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let adapters = &state.adapters;
    let deployment = DeploymentView {
        mode: adapters.deployment.mode.to_string(),
        cache: adapters.cache.backend().as_str(),
        secrets: adapters.secrets.backend().as_str(),
        workers: adapters.workers.backend().as_str(),
        database: adapters.database.backend().as_str(),
        fallbacks: adapters.deployment.fallbacks.len(),
    };
    Json(json!({
        "status": "ok",
        "timestamp": now_rfc3339(),
        "deployment": deployment,
    }))
}

pub(super) async fn ready(State(state): State<HttpState>) -> impl IntoResponse {
    let start = Instant::now();
    let result = state.adapters.database.health_check().await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "ready": true,
                "timestamp": now_rfc3339(),
                "database": "ok",
                "response_time_ms": response_time_ms,
            })),
        )
            .into_response(),
        Err(err) => {
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "ready": false,
                    "timestamp": now_rfc3339(),
                    "database": "failed",
                    "error": err.to_string(),
                    "response_time_ms": response_time_ms,
                })),
            )
                .into_response();
            ErrorReport::from_error("infra::http::ready", StatusCode::SERVICE_UNAVAILABLE, &err)
                .attach(&mut response);
            response
        }
    }
}
