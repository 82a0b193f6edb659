use std::{future::Future, sync::Arc, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::debug;

use crate::infra::telemetry::{METRIC_EXTERNAL_CALL_ERRORS, METRIC_EXTERNAL_CALL_LATENCY};

use super::{DatabaseAdapter, DatabaseBackend, DatabaseError, QueryOutput, Row, SelectOptions};

const SOURCE: &str = "bharatmart::adapters::database";
const DEPENDENCY: &str = "database";

/// Records latency and error counts for every call on the wrapped adapter.
pub struct InstrumentedDatabase {
    inner: Arc<dyn DatabaseAdapter>,
}

impl InstrumentedDatabase {
    pub fn new(inner: Arc<dyn DatabaseAdapter>) -> Self {
        Self { inner }
    }

    async fn observe<T, F>(&self, operation: &'static str, call: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        let started = Instant::now();
        let outcome = call.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let backend = self.inner.backend().as_str();

        histogram!(
            METRIC_EXTERNAL_CALL_LATENCY,
            "dependency" => DEPENDENCY,
            "operation" => operation
        )
        .record(elapsed_ms);

        if let Err(err) = outcome.as_ref() {
            counter!(
                METRIC_EXTERNAL_CALL_ERRORS,
                "dependency" => DEPENDENCY,
                "operation" => operation
            )
            .increment(1);
            debug!(
                target = SOURCE,
                backend,
                operation,
                elapsed_ms,
                error = %err,
                "database call failed"
            );
        }
        outcome
    }
}

#[async_trait]
impl DatabaseAdapter for InstrumentedDatabase {
    fn backend(&self) -> DatabaseBackend {
        self.inner.backend()
    }

    async fn select(&self, table: &str, options: &SelectOptions) -> Result<QueryOutput, DatabaseError> {
        self.observe("select", self.inner.select(table, options)).await
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError> {
        self.observe("insert", self.inner.insert(table, row)).await
    }

    async fn update(&self, table: &str, id: &str, changes: &Row) -> Result<QueryOutput, DatabaseError> {
        self.observe("update", self.inner.update(table, id, changes)).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError> {
        self.observe("delete", self.inner.delete(table, id)).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DatabaseError> {
        self.observe("query", self.inner.query(sql, params)).await
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.observe("health_check", self.inner.health_check()).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
