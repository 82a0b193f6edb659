//! Owned Redis handle shared by the remote cache and the queue store.
//!
//! The connection is opened on first use and reused afterwards. Every command runs under a
//! bounded timeout; transport failures are retried with capped exponential backoff before the
//! error is handed back to the caller.

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use redis::{FromRedisValue, RedisError, aio::ConnectionManager};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::infra::{
    redact::mask_connection_url,
    telemetry::{METRIC_EXTERNAL_CALL_ERRORS, METRIC_EXTERNAL_CALL_LATENCY, METRIC_RETRY_ATTEMPTS},
};

/// Retry budget for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum RedisFailure {
    #[error("invalid redis url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: RedisError,
    },
    #[error("redis {operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("redis {operation} failed: {source}")]
    Command {
        operation: &'static str,
        #[source]
        source: RedisError,
    },
    #[error("redis connection has been closed")]
    Closed,
}

impl RedisFailure {
    fn is_retryable(&self) -> bool {
        match self {
            RedisFailure::Timeout { .. } => true,
            RedisFailure::Command { source, .. } => {
                source.is_io_error()
                    || source.is_connection_refusal()
                    || source.is_connection_dropped()
                    || source.is_timeout()
            }
            RedisFailure::InvalidUrl { .. } | RedisFailure::Closed => false,
        }
    }
}

pub struct RedisConnector {
    dependency: &'static str,
    client: redis::Client,
    display_url: String,
    connection: Mutex<Option<ConnectionManager>>,
    closed: AtomicBool,
    command_timeout: Duration,
    retry: RetryPolicy,
}

impl RedisConnector {
    /// Validate the URL and prepare a handle. No network traffic happens here.
    pub fn new(
        dependency: &'static str,
        url: &str,
        command_timeout: Duration,
    ) -> Result<Self, RedisFailure> {
        let client = redis::Client::open(url).map_err(|source| RedisFailure::InvalidUrl {
            url: mask_connection_url(url),
            source,
        })?;

        Ok(Self {
            dependency,
            client,
            display_url: mask_connection_url(url),
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
            command_timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    pub async fn query<T>(&self, operation: &'static str, cmd: &redis::Cmd) -> Result<T, RedisFailure>
    where
        T: FromRedisValue + Send,
    {
        self.run(operation, |mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    pub async fn query_pipeline<T>(
        &self,
        operation: &'static str,
        pipe: &redis::Pipeline,
    ) -> Result<T, RedisFailure>
    where
        T: FromRedisValue + Send,
    {
        self.run(operation, |mut conn| async move { pipe.query_async(&mut conn).await })
            .await
    }

    /// Drop the pooled connection and refuse further commands.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut guard = self.connection.lock().await;
        if guard.take().is_some() {
            info!(
                target = "bharatmart::infra::redis",
                dependency = self.dependency,
                url = %self.display_url,
                "redis connection closed"
            );
        }
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T, RedisFailure>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let mut retries = 0u32;
        loop {
            let started = Instant::now();
            let outcome = self.attempt(operation, &command).await;
            histogram!(
                METRIC_EXTERNAL_CALL_LATENCY,
                "dependency" => self.dependency,
                "operation" => operation
            )
            .record(started.elapsed().as_secs_f64() * 1000.0);

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    counter!(METRIC_RETRY_ATTEMPTS, "dependency" => self.dependency).increment(1);
                    warn!(
                        target = "bharatmart::infra::redis",
                        dependency = self.dependency,
                        operation,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "redis call failed, retrying"
                    );
                    self.reset_connection().await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    counter!(
                        METRIC_EXTERNAL_CALL_ERRORS,
                        "dependency" => self.dependency,
                        "operation" => operation
                    )
                    .increment(1);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &'static str, command: &F) -> Result<T, RedisFailure>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let timeout_ms = self.command_timeout.as_millis() as u64;
        let call = async {
            let conn = self.connection().await?;
            command(conn)
                .await
                .map_err(|source| RedisFailure::Command { operation, source })
        };

        match tokio::time::timeout(self.command_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RedisFailure::Timeout {
                operation,
                timeout_ms,
            }),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisFailure> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RedisFailure::Closed);
        }

        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|source| RedisFailure::Command {
                operation: "connect",
                source,
            })?;
        debug!(
            target = "bharatmart::infra::redis",
            dependency = self.dependency,
            url = %self.display_url,
            "redis connection established"
        );
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        self.connection.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(30), Duration::from_secs(3));
    }

    #[test]
    fn invalid_url_is_rejected_without_connecting() {
        let result = RedisConnector::new("cache", "not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(RedisFailure::InvalidUrl { .. })));
    }

    #[test]
    fn display_url_hides_password() {
        let connector = RedisConnector::new(
            "cache",
            "redis://:topsecret@cache.internal:6379",
            Duration::from_secs(1),
        )
        .expect("valid url");
        assert!(!connector.display_url().contains("topsecret"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_server_surfaces_after_retries() {
        let connector = RedisConnector::new("cache", "redis://127.0.0.1:1", Duration::from_millis(200))
            .expect("valid url")
            .with_retry(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
            });

        let result: Result<Option<String>, _> =
            connector.query("get", redis::cmd("GET").arg("missing")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closed_connector_refuses_commands() {
        let connector = RedisConnector::new("cache", "redis://127.0.0.1:1", Duration::from_millis(200))
            .expect("valid url");
        connector.close().await;

        let result: Result<Option<String>, _> =
            connector.query("get", redis::cmd("GET").arg("missing")).await;
        assert!(matches!(result, Err(RedisFailure::Closed)));
    }
}
