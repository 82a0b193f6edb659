//! HTTP surface: health checks, product and order resources, payments and queue statistics.

mod health;
mod middleware;
mod orders;
mod payments;
mod products;
mod queues;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
};
use serde_json::{Map, Value};

use crate::{
    adapters::{Adapters, database::QueryOutput},
    application::jobs::JobQueue,
    cache::{CacheOptions, ResponseCacheState, cache_response},
};

pub use middleware::{RequestContext, log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub adapters: Adapters,
    pub queue: JobQueue,
}

impl HttpState {
    pub fn new(adapters: Adapters) -> Self {
        let queue = JobQueue::new(adapters.workers.clone());
        Self { adapters, queue }
    }
}

pub fn build_router(state: HttpState) -> Router {
    let cache = state.adapters.cache.clone();
    let cached = |options: CacheOptions| {
        from_fn_with_state(ResponseCacheState::new(cache.clone(), options), cache_response)
    };

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/health/ready", get(health::ready))
        .route(
            "/api/products",
            get(products::list)
                .layer(cached(CacheOptions::products()))
                .post(products::create),
        )
        .route(
            "/api/products/{id}",
            get(products::show)
                .layer(cached(CacheOptions::product()))
                .put(products::update)
                .delete(products::remove),
        )
        .route(
            "/api/orders",
            get(orders::list)
                .layer(cached(CacheOptions::orders()))
                .post(orders::create),
        )
        .route(
            "/api/orders/{id}",
            get(orders::show).layer(cached(CacheOptions::order())),
        )
        .route("/api/orders/{id}/status", patch(orders::update_status))
        .route("/api/payments", post(payments::create))
        .route("/api/queues/stats", get(queues::stats))
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}

/// `limit`/`offset` query parameters with the listing defaults applied.
#[derive(Debug, Clone, Copy)]
struct Page {
    limit: u64,
    offset: u64,
}

impl Page {
    const DEFAULT_LIMIT: u64 = 50;
    const MAX_LIMIT: u64 = 200;

    fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

fn listing(output: QueryOutput, page: Page) -> Value {
    serde_json::json!({
        "data": output.rows,
        "count": output.count,
        "limit": page.limit,
        "offset": page.offset,
    })
}

/// Row ids may be numeric or textual depending on the backend.
fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn object(row: Value) -> Map<String, Value> {
    match row {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
