use metrics::counter;
use tracing::{error, info};

use crate::{adapters::cache::CacheAdapter, infra::telemetry::METRIC_CACHE_INVALIDATED};

use super::keys::order_patterns;

const SOURCE: &str = "bharatmart::cache::invalidation";

/// Delete every key matching `pattern` and return how many were removed.
///
/// Failures are logged and reported as `0`; a write that triggered the invalidation must not
/// fail because of it.
pub async fn invalidate_pattern(cache: &dyn CacheAdapter, pattern: &str) -> u64 {
    match cache.delete_pattern(pattern).await {
        Ok(removed) => {
            counter!(METRIC_CACHE_INVALIDATED).increment(removed);
            info!(target = SOURCE, pattern, removed, "cache keys invalidated");
            removed
        }
        Err(err) => {
            error!(
                target = SOURCE,
                pattern,
                error = %err,
                failure_kind = "connectivity",
                "cache invalidation failed"
            );
            0
        }
    }
}

pub async fn invalidate_patterns<I, S>(cache: &dyn CacheAdapter, patterns: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut removed = 0;
    for pattern in patterns {
        removed += invalidate_pattern(cache, pattern.as_ref()).await;
    }
    removed
}

/// Drop the order listings and the cached views of one order after its row changed.
pub async fn invalidate_order(cache: &dyn CacheAdapter, order_id: &str) -> u64 {
    invalidate_patterns(cache, order_patterns(order_id)).await
}
