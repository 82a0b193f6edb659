//! HTTP response caching on top of the cache capability.

pub mod invalidation;
pub mod keys;
pub mod middleware;

pub use invalidation::{invalidate_order, invalidate_pattern, invalidate_patterns};
pub use keys::{collection_pattern, item_patterns, order_patterns, response_key};
pub use middleware::{CACHE_STATUS_HEADER, CacheOptions, KeyFn, ResponseCacheState, cache_response};
