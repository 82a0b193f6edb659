use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    adapters::database::{Row, SelectOptions},
    application::error::AppError,
    cache::{collection_pattern, invalidate_order, invalidate_patterns},
    domain::{
        jobs::{OrderItem, OrderProcessingJob},
        types::OrderStatus,
    },
    util::timestamp::now_rfc3339,
};

use super::{HttpState, Page, listing, object, row_id};

const SOURCE: &str = "bharatmart::http::orders";

#[derive(Debug, Deserialize)]
pub(super) struct OrderListQuery {
    status: Option<String>,
    user_id: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OrderItemInput {
    product_id: String,
    quantity: i64,
    unit_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateOrderRequest {
    user_id: Option<String>,
    #[serde(default)]
    items: Vec<OrderItemInput>,
    shipping_address: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusChange {
    status: String,
}

pub(super) async fn list(
    State(state): State<HttpState>,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(query.limit, query.offset);
    let mut options = SelectOptions::new()
        .order_by("created_at", false)
        .limit(page.limit)
        .offset(page.offset);
    if let Some(status) = query.status.filter(|s| !s.is_empty()) {
        options = options.filter("status", status);
    }
    if let Some(user_id) = query.user_id.filter(|u| !u.is_empty()) {
        options = options.filter("user_id", user_id);
    }

    let output = state.adapters.database.select("orders", &options).await?;
    Ok(Json(listing(output, page)))
}

/// The order row with its line items and payment attached.
pub(super) async fn show(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let database = &state.adapters.database;
    let order = database
        .select("orders", &SelectOptions::new().filter("id", id.clone()).limit(1))
        .await?
        .into_first()
        .ok_or(AppError::NotFound)?;

    let items = database
        .select(
            "order_items",
            &SelectOptions::new().filter("order_id", id.clone()),
        )
        .await?;
    let payment = database
        .select(
            "payments",
            &SelectOptions::new()
                .filter("order_id", id)
                .order_by("created_at", false)
                .limit(1),
        )
        .await?
        .into_first()
        .unwrap_or(Value::Null);

    let mut body = object(order);
    body.insert("items".into(), Value::Array(items.rows));
    body.insert("payment".into(), payment);
    Ok(Json(Value::Object(body)))
}

pub(super) async fn create(
    State(state): State<HttpState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Some(user_id) = request.user_id.filter(|u| !u.is_empty()) else {
        return Err(AppError::validation("Missing required fields: user_id, items"));
    };
    if request.items.is_empty() {
        return Err(AppError::validation("Missing required fields: user_id, items"));
    }
    if request.items.iter().any(|item| item.quantity <= 0) {
        return Err(AppError::validation("Item quantity must be positive"));
    }

    let database = &state.adapters.database;
    let mut items = Vec::with_capacity(request.items.len());
    let mut total_amount = 0.0;
    for item in &request.items {
        let catalogue_price = database
            .select(
                "products",
                &SelectOptions::new()
                    .columns(["price"])
                    .filter("id", item.product_id.clone())
                    .limit(1),
            )
            .await?
            .first()
            .and_then(|row| row.get("price"))
            .and_then(Value::as_f64);
        if let Some(price) = catalogue_price {
            total_amount += price * item.quantity as f64;
        }
        items.push(OrderItem {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            price: item.unit_price.or(catalogue_price).unwrap_or(0.0),
        });
    }

    let mut row = Row::new();
    row.insert("user_id".into(), json!(user_id));
    row.insert("status".into(), json!(OrderStatus::Pending.as_str()));
    row.insert("total_amount".into(), json!(total_amount));
    row.insert(
        "shipping_address".into(),
        request.shipping_address.unwrap_or(Value::Null),
    );
    let order = database
        .insert("orders", &row)
        .await?
        .into_first()
        .ok_or_else(|| AppError::unexpected("order insert returned no row"))?;
    let order_id =
        row_id(&order).ok_or_else(|| AppError::unexpected("order row has no id"))?;

    for item in &items {
        let mut line = Row::new();
        line.insert("order_id".into(), json!(order_id));
        line.insert("product_id".into(), json!(item.product_id));
        line.insert("quantity".into(), json!(item.quantity));
        line.insert("unit_price".into(), json!(item.price));
        database.insert("order_items", &line).await?;
    }
    // The rows exist from here on even if the enqueue below fails.
    invalidate_patterns(state.adapters.cache.as_ref(), [collection_pattern("orders")]).await;

    let job_id = state
        .queue
        .enqueue_order(&OrderProcessingJob {
            order_id: order_id.clone(),
            user_id: user_id.clone(),
            total_amount,
            items,
        })
        .await?;
    info!(
        target = SOURCE,
        order_id = %order_id,
        user_id = %user_id,
        total_amount,
        job_id = %job_id,
        "order created"
    );

    Ok((StatusCode::CREATED, Json(order)))
}

pub(super) async fn update_status(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<impl IntoResponse, AppError> {
    let status = OrderStatus::try_from(change.status.as_str())
        .ok()
        .filter(|status| status.is_user_assignable())
        .ok_or_else(|| AppError::validation("Invalid status"))?;

    let now = now_rfc3339();
    let mut changes = Row::new();
    changes.insert("status".into(), json!(status.as_str()));
    changes.insert("updated_at".into(), json!(now));
    if matches!(status, OrderStatus::Processing | OrderStatus::Shipped) {
        changes.insert("processed_at".into(), json!(now));
    }

    let updated = state
        .adapters
        .database
        .update("orders", &id, &changes)
        .await?
        .into_first()
        .ok_or(AppError::NotFound)?;

    invalidate_order(state.adapters.cache.as_ref(), &id).await;
    Ok(Json(updated))
}
