use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::infra::redis::{RedisConnector, RedisFailure};

use super::{CacheAdapter, CacheBackend, CacheError};

const SOURCE: &str = "bharatmart::adapters::cache::redis";
const SCAN_BATCH: usize = 200;

/// Redis-backed cache. Every key is stored under `namespace` so `clear` and pattern deletes
/// never touch data owned by other services sharing the instance.
pub struct RedisCache {
    connector: RedisConnector,
    namespace: String,
}

impl RedisCache {
    pub fn new(connector: RedisConnector, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        info!(
            target = SOURCE,
            url = %connector.display_url(),
            namespace = %namespace,
            "redis cache configured"
        );
        Self {
            connector,
            namespace,
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn namespaced_pattern(&self, pattern: &str) -> String {
        format!("{}{pattern}", escape_glob(&self.namespace))
    }

    async fn scan_and_delete(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .connector
                .query(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await
                .map_err(connectivity)?;

            if !keys.is_empty() {
                let deleted: u64 = self
                    .connector
                    .query("del", redis::cmd("DEL").arg(&keys))
                    .await
                    .map_err(connectivity)?;
                removed += deleted;
            }

            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl CacheAdapter for RedisCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let raw: Option<String> = self
            .connector
            .query("get", redis::cmd("GET").arg(self.namespaced(key)))
            .await
            .map_err(connectivity)?;
        Ok(raw.map(decode_value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let key = self.namespaced(key);
        let encoded = encode_value(&value);
        match ttl {
            Some(ttl) => {
                let _: () = self
                    .connector
                    .query(
                        "setex",
                        redis::cmd("SETEX")
                            .arg(&key)
                            .arg(ttl_seconds(ttl))
                            .arg(encoded),
                    )
                    .await
                    .map_err(connectivity)?;
            }
            None => {
                let _: () = self
                    .connector
                    .query("set", redis::cmd("SET").arg(&key).arg(encoded))
                    .await
                    .map_err(connectivity)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _: u64 = self
            .connector
            .query("del", redis::cmd("DEL").arg(self.namespaced(key)))
            .await
            .map_err(connectivity)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        if self.namespace.is_empty() {
            warn!(
                target = SOURCE,
                "cache namespace is empty, flushing the whole redis database"
            );
            let _: () = self
                .connector
                .query("flushdb", &redis::cmd("FLUSHDB"))
                .await
                .map_err(connectivity)?;
            return Ok(());
        }

        let pattern = self.namespaced_pattern("*");
        let removed = self.scan_and_delete(&pattern).await?;
        info!(target = SOURCE, removed, "redis cache namespace cleared");
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let exists: i64 = self
            .connector
            .query("exists", redis::cmd("EXISTS").arg(self.namespaced(key)))
            .await
            .map_err(connectivity)?;
        Ok(exists == 1)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let pattern = self.namespaced_pattern(pattern);
        self.scan_and_delete(&pattern).await
    }

    async fn close(&self) {
        self.connector.close().await;
    }
}

fn connectivity(err: RedisFailure) -> CacheError {
    CacheError::Connectivity(err.to_string())
}

/// Strings are stored verbatim, anything else as JSON text.
pub(crate) fn encode_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parse stored text as JSON, keeping it as a plain string when it is not JSON.
pub(crate) fn decode_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// SETEX takes whole seconds; round up so short TTLs do not become "expire immediately".
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
