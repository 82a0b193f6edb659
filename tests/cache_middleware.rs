mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, Uri},
    middleware,
    routing::get,
};
use bharatmart::{
    adapters::{cache::CacheAdapter, workers::InProcessWorker},
    cache::{CACHE_STATUS_HEADER, CacheOptions, ResponseCacheState, cache_response, invalidate_pattern},
    infra::http::{HttpState, build_router},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{FailingCache, MemoryDatabase, adapters, memory_cache, settle};

struct Fixture {
    router: Router,
    cache: Arc<dyn CacheAdapter>,
    database: Arc<MemoryDatabase>,
}

fn fixture(cache: Arc<dyn CacheAdapter>) -> Fixture {
    let database = Arc::new(MemoryDatabase::new());
    let state = HttpState::new(adapters(
        cache.clone(),
        Arc::new(InProcessWorker::new()),
        database.clone(),
    ));
    Fixture {
        router: build_router(state),
        cache,
        database,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Option<String>, Bytes) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("router is infallible");
    let status = response.status();
    let cache_status = response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, cache_status, bytes)
}

async fn get_uri(router: &Router, uri: &str) -> (StatusCode, Option<String>, Bytes) {
    send(router, Method::GET, uri, None).await
}

#[tokio::test]
async fn second_get_is_a_hit_with_identical_body() {
    let fx = fixture(memory_cache());
    fx.database.seed(
        "products",
        json!({"name": "Masala Chai", "price": 120.0, "category": "tea", "stock_quantity": 40}),
    );

    let (status, cache_status, first) = get_uri(&fx.router, "/api/products?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    settle().await;

    let (status, cache_status, second) = get_uri(&fx.router, "/api/products?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status.as_deref(), Some("HIT"));
    assert_eq!(first, second);
    assert_eq!(fx.database.select_count("products"), 1);

    let listing: Value = serde_json::from_slice(&second).expect("json");
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["limit"], 10);
}

#[tokio::test]
async fn different_query_strings_are_cached_separately() {
    let fx = fixture(memory_cache());

    get_uri(&fx.router, "/api/orders?status=pending").await;
    settle().await;
    let (_, cache_status, _) = get_uri(&fx.router, "/api/orders?status=shipped").await;

    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(fx.database.select_count("orders"), 2);
}

#[tokio::test]
async fn invalidated_pattern_turns_next_get_into_a_miss() {
    let fx = fixture(memory_cache());
    fx.database.seed("orders", json!({"user_id": "u-1", "status": "pending", "total_amount": 10.0}));

    get_uri(&fx.router, "/api/orders").await;
    settle().await;
    let (_, cache_status, _) = get_uri(&fx.router, "/api/orders").await;
    assert_eq!(cache_status.as_deref(), Some("HIT"));

    let removed = invalidate_pattern(fx.cache.as_ref(), "orders:*").await;
    assert_eq!(removed, 1);

    let (_, cache_status, _) = get_uri(&fx.router, "/api/orders").await;
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    assert_eq!(fx.database.select_count("orders"), 2);
}

#[tokio::test]
async fn product_update_evicts_cached_item_and_listing() {
    let fx = fixture(memory_cache());
    let id = fx.database.seed(
        "products",
        json!({"name": "Basmati Rice", "price": 90.0, "category": "grains"}),
    );
    let item_uri = format!("/api/products/{id}");

    get_uri(&fx.router, &item_uri).await;
    get_uri(&fx.router, &format!("{item_uri}?fields=all")).await;
    get_uri(&fx.router, "/api/products").await;
    settle().await;
    assert_eq!(get_uri(&fx.router, &item_uri).await.1.as_deref(), Some("HIT"));

    let (status, _, _) = send(
        &fx.router,
        Method::PUT,
        &item_uri,
        Some(json!({"name": "Aged Basmati Rice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, cache_status, body) = get_uri(&fx.router, &item_uri).await;
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    let product: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(product["name"], "Aged Basmati Rice");
    assert_eq!(
        get_uri(&fx.router, &format!("{item_uri}?fields=all")).await.1.as_deref(),
        Some("MISS")
    );
    assert_eq!(get_uri(&fx.router, "/api/products").await.1.as_deref(), Some("MISS"));
}

#[tokio::test]
async fn error_responses_are_not_cached() {
    let fx = fixture(memory_cache());

    let (status, cache_status, _) = get_uri(&fx.router, "/api/products/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(cache_status.as_deref(), Some("MISS"));
    settle().await;

    let (_, cache_status, _) = get_uri(&fx.router, "/api/products/missing").await;
    assert_eq!(cache_status.as_deref(), Some("MISS"));
}

#[tokio::test]
async fn writes_bypass_the_cache() {
    let fx = fixture(memory_cache());

    let (status, cache_status, _) = send(
        &fx.router,
        Method::POST,
        "/api/products",
        Some(json!({"name": "Ghee", "price": 550.0, "category": "dairy"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(cache_status, None);
}

#[tokio::test]
async fn unreachable_cache_never_affects_responses() {
    let fx = fixture(Arc::new(FailingCache));
    fx.database.seed("products", json!({"name": "Jaggery", "price": 60.0, "category": "sweeteners"}));

    for _ in 0..2 {
        let (status, cache_status, body) = get_uri(&fx.router, "/api/products").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache_status.as_deref(), Some("MISS"));
        let listing: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(listing["count"], 1);
        settle().await;
    }

    let (status, _, _) = send(
        &fx.router,
        Method::POST,
        "/api/products",
        Some(json!({"name": "Honey", "price": 300.0, "category": "sweeteners"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn custom_key_generator_controls_sharing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let options = CacheOptions::new("custom", Duration::from_secs(30))
        .with_key_fn(Arc::new(|method: &Method, uri: &Uri| format!("custom:{method}:{}", uri.path())));
    let router = Router::new()
        .route(
            "/catalogue",
            get(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Json(json!({ "call": n }))
                }
            }),
        )
        .layer(middleware::from_fn_with_state(
            ResponseCacheState::new(memory_cache(), options),
            cache_response,
        ));

    let (_, first_status, first) = get_uri(&router, "/catalogue?page=1").await;
    settle().await;
    let (_, second_status, second) = get_uri(&router, "/catalogue?page=2").await;

    assert_eq!(first_status.as_deref(), Some("MISS"));
    assert_eq!(second_status.as_deref(), Some("HIT"));
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
