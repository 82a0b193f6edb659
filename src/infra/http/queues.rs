use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::{application::error::AppError, util::timestamp::now_rfc3339};

use super::HttpState;

pub(super) async fn stats(State(state): State<HttpState>) -> Result<impl IntoResponse, AppError> {
    let queues = state.queue.overview().await?;
    Ok(Json(json!({
        "timestamp": now_rfc3339(),
        "queues": queues,
    })))
}
