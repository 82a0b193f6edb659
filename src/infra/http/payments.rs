use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    adapters::database::SelectOptions,
    application::error::AppError,
    domain::jobs::PaymentProcessingJob,
};

use super::HttpState;

#[derive(Debug, Deserialize)]
pub(super) struct PaymentRequest {
    order_id: Option<String>,
    amount: Option<f64>,
    payment_method: Option<String>,
}

/// Accepts a payment for asynchronous processing. The order must exist; its owner receives
/// the outcome email.
pub(super) async fn create(
    State(state): State<HttpState>,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(order_id), Some(amount), Some(payment_method)) = (
        request.order_id.filter(|id| !id.is_empty()),
        request.amount.filter(|amount| *amount > 0.0),
        request.payment_method.filter(|method| !method.is_empty()),
    ) else {
        return Err(AppError::validation(
            "Missing required fields: order_id, amount, payment_method",
        ));
    };

    let order = state
        .adapters
        .database
        .select(
            "orders",
            &SelectOptions::new()
                .columns(["id", "user_id"])
                .filter("id", order_id.clone())
                .limit(1),
        )
        .await?
        .into_first()
        .ok_or(AppError::NotFound)?;
    let user_id = order
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let job_id = state
        .queue
        .enqueue_payment(&PaymentProcessingJob {
            order_id: order_id.clone(),
            amount,
            payment_method,
            user_id,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "order_id": order_id,
            "status": "queued",
        })),
    ))
}
