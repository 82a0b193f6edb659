//! Read-through response cache for GET routes.
//!
//! A hit is answered from the cache without calling the handler. A miss runs the handler and,
//! when it produced a successful JSON body, stores the exact bytes in a detached task so the
//! response never waits on the cache.

use std::{fmt, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderValue, Method, Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    adapters::cache::{CacheAdapter, CacheExt},
    infra::telemetry::{METRIC_CACHE_HIT, METRIC_CACHE_MISS},
};

use super::keys::response_key;

const SOURCE: &str = "bharatmart::cache::middleware";
pub const CACHE_STATUS_HEADER: &str = "x-cache";
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_PREFIX: &str = "api";

pub type KeyFn = Arc<dyn Fn(&Method, &Uri) -> String + Send + Sync>;

/// Per-route cache settings.
#[derive(Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub prefix: &'static str,
    key_fn: Option<KeyFn>,
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_TTL)
    }
}

impl CacheOptions {
    pub fn new(prefix: &'static str, ttl: Duration) -> Self {
        Self {
            ttl,
            prefix,
            key_fn: None,
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    pub fn orders() -> Self {
        Self::new("orders", Duration::from_secs(60))
    }

    pub fn order() -> Self {
        Self::new("order", Duration::from_secs(120))
    }

    pub fn products() -> Self {
        Self::new("products", Duration::from_secs(300))
    }

    pub fn product() -> Self {
        Self::new("product", Duration::from_secs(600))
    }

    pub fn key_for(&self, method: &Method, uri: &Uri) -> String {
        match self.key_fn.as_ref() {
            Some(key_fn) => key_fn(method, uri),
            None => response_key(self.prefix, method, uri),
        }
    }
}

#[derive(Clone)]
pub struct ResponseCacheState {
    pub cache: Arc<dyn CacheAdapter>,
    pub options: CacheOptions,
}

impl ResponseCacheState {
    pub fn new(cache: Arc<dyn CacheAdapter>, options: CacheOptions) -> Self {
        Self { cache, options }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedJson {
    content_type: String,
    body: String,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn cache_response(
    State(state): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| request.uri().clone());
    let key = state.options.key_for(request.method(), &uri);
    let prefix = state.options.prefix;

    match state.cache.get_as::<CachedJson>(&key).await {
        Ok(Some(cached)) => {
            counter!(METRIC_CACHE_HIT, "prefix" => prefix).increment(1);
            debug!(target = SOURCE, key = %key, outcome = "hit", "serving cached response");
            return hit_response(cached);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(
                target = SOURCE,
                key = %key,
                error = %err,
                failure_kind = "connectivity",
                "cache read failed, treating as miss"
            );
        }
    }

    counter!(METRIC_CACHE_MISS, "prefix" => prefix).increment(1);
    debug!(target = SOURCE, key = %key, outcome = "miss", "running handler");

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));

    let content_type = json_content_type(&response);
    let Some(content_type) = content_type.filter(|_| response.status().is_success()) else {
        return response;
    };

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(target = SOURCE, key = %key, error = %err, "response body could not be read");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        store_detached(
            state.cache.clone(),
            key,
            CachedJson {
                content_type,
                body: text.to_owned(),
            },
            state.options.ttl,
        );
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn json_content_type(response: &Response) -> Option<String> {
    let value = response.headers().get(header::CONTENT_TYPE)?.to_str().ok()?;
    value
        .starts_with("application/json")
        .then(|| value.to_string())
}

/// Best effort: a failed write is logged and otherwise ignored.
fn store_detached(cache: Arc<dyn CacheAdapter>, key: String, entry: CachedJson, ttl: Duration) {
    tokio::spawn(async move {
        if let Err(err) = cache.set_as(&key, &entry, Some(ttl)).await {
            warn!(
                target = SOURCE,
                key = %key,
                error = %err,
                failure_kind = "connectivity",
                "storing response in cache failed"
            );
        }
    });
}

fn hit_response(cached: CachedJson) -> Response {
    let content_type = HeaderValue::from_str(&cached.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
    let mut response = Response::new(Body::from(cached.body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    response
}
