use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use crate::util::lock;

use super::{CacheAdapter, CacheBackend, CacheError, pattern::matches_pattern};

const SOURCE: &str = "bharatmart::adapters::cache::memory";
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

type Entries = DashMap<String, CacheEntry>;

/// In-process cache. Expired entries are never returned: reads evict them lazily and a
/// background sweep removes the rest every minute.
pub struct MemoryCache {
    entries: Arc<Entries>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// The sweep task is only started when a Tokio runtime is available.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let entries = Arc::new(Entries::new());
        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(sweep_loop(Arc::downgrade(&entries), interval)));

        info!(target = SOURCE, sweep_secs = interval.as_secs(), "memory cache initialised");

        Self {
            entries,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = lock::lock(&self.sweeper, SOURCE).take() {
            handle.abort();
        }
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

async fn sweep_loop(entries: Weak<Entries>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            return;
        };
        let removed = purge(&entries, Instant::now());
        if removed > 0 {
            debug!(target = SOURCE, removed, "swept expired cache entries");
        }
    }
}

fn purge(entries: &Entries, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if hit {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(Instant::now()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !matches_pattern(pattern, key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn close(&self) {
        self.stop_sweeper();
        self.entries.clear();
    }
}
