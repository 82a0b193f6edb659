#![allow(dead_code)]

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bharatmart::{
    adapters::{
        Adapters,
        cache::{CacheAdapter, CacheBackend, CacheError, MemoryCache},
        database::{
            DatabaseAdapter, DatabaseBackend, DatabaseError, QueryOutput, Row, SelectOptions,
        },
        secrets::EnvSecretsProvider,
        workers::{
            JobHandler, JobOptions, QueueStats, WorkerAdapter, WorkerBackend, WorkerError,
        },
    },
    application::jobs::{MailError, Mailer},
    config::DeploymentConfig,
    domain::{jobs::EmailNotificationJob, types::JobType},
};
use serde_json::{Value, json};

/// Table-per-map database with optional per-table write failures.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failing_writes: Mutex<HashSet<String>>,
    selects: Mutex<BTreeMap<String, u64>>,
    next_id: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, row: Value) -> String {
        let Value::Object(mut row) = row else {
            panic!("seed rows must be objects");
        };
        let id = match row.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => {
                let id = self.fresh_id();
                row.insert("id".into(), json!(id));
                id
            }
        };
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
        id
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|row| text(row.get("id")) == id)
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    pub fn select_count(&self, table: &str) -> u64 {
        self.selects
            .lock()
            .unwrap()
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn fresh_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    fn check_writable(&self, table: &str) -> Result<(), DatabaseError> {
        if self.failing_writes.lock().unwrap().contains(table) {
            Err(DatabaseError::Connectivity(format!("{table} is unavailable")))
        } else {
            Ok(())
        }
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => text(a).cmp(&text(b)),
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryDatabase {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn select(
        &self,
        table: &str,
        options: &SelectOptions,
    ) -> Result<QueryOutput, DatabaseError> {
        *self
            .selects
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default() += 1;

        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|row| {
                options.filters.iter().all(|(column, expected)| match expected {
                    Value::Null => row.get(column).is_none_or(Value::is_null),
                    expected => text(row.get(column)) == text(Some(expected)),
                })
            })
            .collect();
        if let Some(order) = &options.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending { ordering } else { ordering.reverse() }
            });
        }

        let total = rows.len() as u64;
        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map_or(usize::MAX, |limit| limit as usize);
        let page = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| match &options.columns {
                Some(columns) => Value::Object(
                    row.into_iter()
                        .filter(|(key, _)| columns.contains(key))
                        .collect(),
                ),
                None => Value::Object(row),
            })
            .collect();
        Ok(QueryOutput { rows: page, count: total })
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<QueryOutput, DatabaseError> {
        self.check_writable(table)?;
        let mut row = row.clone();
        if !row.contains_key("id") {
            row.insert("id".into(), json!(self.fresh_id()));
        }
        let seq = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        row.entry("created_at")
            .or_insert_with(|| json!(format!("2024-01-01T00:00:{:02}Z", seq % 60)));
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(QueryOutput::from_rows(vec![Value::Object(row)]))
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        changes: &Row,
    ) -> Result<QueryOutput, DatabaseError> {
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap();
        let updated: Vec<Value> = tables
            .get_mut(table)
            .into_iter()
            .flatten()
            .filter(|row| text(row.get("id")) == id)
            .map(|row| {
                for (key, value) in changes {
                    row.insert(key.clone(), value.clone());
                }
                Value::Object(row.clone())
            })
            .collect();
        Ok(QueryOutput::from_rows(updated))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<u64, DatabaseError> {
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| text(row.get("id")) != id);
        Ok((before - rows.len()) as u64)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryOutput, DatabaseError> {
        Err(DatabaseError::NotImplemented { backend: "memory" })
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Cache whose every operation fails, as an unreachable remote would.
pub struct FailingCache;

#[async_trait]
impl CacheAdapter for FailingCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Redis
    }

    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(down())
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(down())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(down())
    }

    async fn has(&self, _key: &str) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Err(down())
    }
}

fn down() -> CacheError {
    CacheError::Connectivity("connection refused".into())
}

/// Queue whose backend refuses every submission.
pub struct FailingWorker;

#[async_trait]
impl WorkerAdapter for FailingWorker {
    fn backend(&self) -> WorkerBackend {
        WorkerBackend::Queue
    }

    async fn add_job(
        &self,
        _job_type: JobType,
        _payload: Value,
        _options: JobOptions,
    ) -> Result<String, WorkerError> {
        Err(WorkerError::Connectivity("connection refused".into()))
    }

    async fn process_jobs(&self, _handler: Arc<dyn JobHandler>) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn job_type_stats(&self, _job_type: JobType) -> Result<QueueStats, WorkerError> {
        Ok(QueueStats::default())
    }

    async fn close(&self) {}
}

/// Keeps every delivered email for inspection.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailNotificationJob>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<EmailNotificationJob> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &EmailNotificationJob) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn adapters(
    cache: Arc<dyn CacheAdapter>,
    workers: Arc<dyn WorkerAdapter>,
    database: Arc<dyn DatabaseAdapter>,
) -> Adapters {
    Adapters {
        deployment: Arc::new(DeploymentConfig::default()),
        cache,
        secrets: Arc::new(EnvSecretsProvider::from_vars(Vec::new())),
        workers,
        database,
    }
}

pub fn memory_cache() -> Arc<dyn CacheAdapter> {
    Arc::new(MemoryCache::new())
}

/// Let detached cache writes run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
