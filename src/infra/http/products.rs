use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    adapters::database::{Row, SelectOptions},
    application::error::AppError,
    cache::{collection_pattern, invalidate_patterns, item_patterns},
    util::timestamp::now_rfc3339,
};

use super::{HttpState, Page, listing};

const TABLE: &str = "products";

#[derive(Debug, Deserialize)]
pub(super) struct ProductListQuery {
    category: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

/// Body of both create and update. Absent fields are left untouched on update.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ProductInput {
    name: Option<String>,
    description: Option<String>,
    price: Option<f64>,
    category: Option<String>,
    stock_quantity: Option<i64>,
    sku: Option<String>,
}

impl ProductInput {
    fn into_row(self) -> Row {
        let mut row = Row::new();
        let mut put = |column: &str, value: Option<Value>| {
            if let Some(value) = value {
                row.insert(column.to_string(), value);
            }
        };
        put("name", self.name.map(Value::from));
        put("description", self.description.map(Value::from));
        put("price", self.price.map(Value::from));
        put("category", self.category.map(Value::from));
        put("stock_quantity", self.stock_quantity.map(Value::from));
        put("sku", self.sku.map(Value::from));
        row
    }
}

pub(super) async fn list(
    State(state): State<HttpState>,
    Query(query): Query<ProductListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(query.limit, query.offset);
    let mut options = SelectOptions::new()
        .order_by("name", true)
        .limit(page.limit)
        .offset(page.offset);
    if let Some(category) = query.category.filter(|c| !c.is_empty()) {
        options = options.filter("category", category);
    }

    let output = state.adapters.database.select(TABLE, &options).await?;
    Ok(Json(listing(output, page)))
}

pub(super) async fn show(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let output = state
        .adapters
        .database
        .select(TABLE, &SelectOptions::new().filter("id", id).limit(1))
        .await?;
    output.into_first().map(Json).ok_or(AppError::NotFound)
}

pub(super) async fn create(
    State(state): State<HttpState>,
    Json(input): Json<ProductInput>,
) -> Result<impl IntoResponse, AppError> {
    let complete = input.name.as_deref().is_some_and(|n| !n.is_empty())
        && input.price.is_some()
        && input.category.as_deref().is_some_and(|c| !c.is_empty());
    if !complete {
        return Err(AppError::validation(
            "Missing required fields: name, price, category",
        ));
    }

    let mut row = input.into_row();
    row.entry("stock_quantity").or_insert(json!(0));
    let created = state
        .adapters
        .database
        .insert(TABLE, &row)
        .await?
        .into_first()
        .unwrap_or(Value::Null);

    invalidate_products(&state, None).await;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn update(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(input): Json<ProductInput>,
) -> Result<impl IntoResponse, AppError> {
    let mut changes = input.into_row();
    changes.insert("updated_at".into(), json!(now_rfc3339()));

    let updated = state
        .adapters
        .database
        .update(TABLE, &id, &changes)
        .await?
        .into_first()
        .ok_or(AppError::NotFound)?;

    invalidate_products(&state, Some(&id)).await;
    Ok(Json(updated))
}

pub(super) async fn remove(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.adapters.database.delete(TABLE, &id).await?;
    invalidate_products(&state, Some(&id)).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn invalidate_products(state: &HttpState, id: Option<&str>) {
    let mut patterns = vec![collection_pattern("products")];
    if let Some(id) = id {
        patterns.extend(item_patterns("product", &format!("/api/products/{id}")));
    }
    invalidate_patterns(state.adapters.cache.as_ref(), patterns).await;
}
