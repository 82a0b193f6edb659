//! Cache capability.
//!
//! Two interchangeable backends sit behind [`CacheAdapter`]:
//! - [`MemoryCache`]: in-process map with lazy expiry and a periodic sweep
//! - [`RedisCache`]: remote store reached through [`crate::infra::redis::RedisConnector`]
//!
//! Values are opaque JSON documents. Callers that need typed access go through [`CacheExt`].

mod memory;
mod pattern;
mod remote;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryCache;
pub use pattern::matches_pattern;
pub use remote::RedisCache;

/// Which backend an adapter instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl CacheBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Connectivity(String),
    #[error("cache value could not be encoded: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait CacheAdapter: Send + Sync {
    fn backend(&self) -> CacheBackend;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value`; `ttl = None` keeps the entry until it is deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key matching a glob pattern (`*`, `?`, `[...]`) and return how many went.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Release background resources. Further calls may fail.
    async fn close(&self) {}
}

/// Typed convenience layer over any [`CacheAdapter`].
#[async_trait]
pub trait CacheExt: CacheAdapter {
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| CacheError::Serialization(err.to_string())),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + Sync,
    {
        let value =
            serde_json::to_value(value).map_err(|err| CacheError::Serialization(err.to_string()))?;
        self.set(key, value, ttl).await
    }
}

impl<C: CacheAdapter + ?Sized> CacheExt for C {}
