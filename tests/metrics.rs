mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use bharatmart::{
    adapters::{
        cache::{CacheAdapter, RedisCache},
        database::{DatabaseAdapter, InstrumentedDatabase},
        workers::{InProcessWorker, WorkerAdapter},
    },
    application::jobs::{JobDispatcher, JobQueue, SimulatedGateway, WorkerContext},
    cache::invalidate_pattern,
    infra::{
        http::{HttpState, build_router},
        redis::{RedisConnector, RetryPolicy},
        telemetry::{
            METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED, METRIC_CACHE_MISS,
            METRIC_EXTERNAL_CALL_LATENCY, METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED,
            METRIC_PAYMENTS_PROCESSED, METRIC_RETRY_ATTEMPTS,
        },
    },
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tower::ServiceExt;

use common::{MemoryDatabase, RecordingMailer, adapters, memory_cache, settle};

#[tokio::test]
async fn adapters_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let memory = Arc::new(MemoryDatabase::new());
    let order_id = memory.seed(
        "orders",
        json!({"user_id": "u-1", "status": "processing", "total_amount": 10.0}),
    );
    let database: Arc<dyn DatabaseAdapter> = Arc::new(InstrumentedDatabase::new(memory));
    let workers: Arc<dyn WorkerAdapter> = Arc::new(InProcessWorker::new());
    let cache = memory_cache();
    let context = WorkerContext::new(
        database.clone(),
        cache.clone(),
        JobQueue::new(workers.clone()),
    )
    .with_gateway(Arc::new(SimulatedGateway::always_decline()))
    .with_mailer(Arc::new(RecordingMailer::default()));
    workers
        .process_jobs(Arc::new(JobDispatcher::all(Arc::new(context))))
        .await
        .expect("register");

    let router = build_router(HttpState::new(adapters(
        cache.clone(),
        workers.clone(),
        database,
    )));

    for uri in ["/api/orders", "/api/orders"] {
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        settle().await;
    }
    invalidate_pattern(cache.as_ref(), "orders:*").await;

    let payment = Request::builder()
        .method(Method::POST)
        .uri("/api/payments")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"order_id": order_id, "amount": 10.0, "payment_method": "card"}).to_string(),
        ))
        .expect("request");
    let response = router.clone().oneshot(payment).await.expect("respond");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let unreachable = RedisCache::new(
        RedisConnector::new("cache", "redis://127.0.0.1:1", Duration::from_millis(100))
            .expect("valid url")
            .with_retry(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            }),
        "metrics:",
    );
    assert!(unreachable.get("k").await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        METRIC_CACHE_HIT,
        METRIC_CACHE_MISS,
        METRIC_CACHE_INVALIDATED,
        METRIC_EXTERNAL_CALL_LATENCY,
        METRIC_JOBS_COMPLETED,
        METRIC_JOBS_FAILED,
        METRIC_PAYMENTS_PROCESSED,
        METRIC_RETRY_ATTEMPTS,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
