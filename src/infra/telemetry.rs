use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const METRIC_CACHE_HIT: &str = "bharatmart_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "bharatmart_cache_miss_total";
pub const METRIC_CACHE_INVALIDATED: &str = "bharatmart_cache_invalidated_keys_total";
pub const METRIC_RETRY_ATTEMPTS: &str = "bharatmart_retry_attempts_total";
pub const METRIC_EXTERNAL_CALL_LATENCY: &str = "bharatmart_external_call_latency_ms";
pub const METRIC_EXTERNAL_CALL_ERRORS: &str = "bharatmart_external_call_errors_total";
pub const METRIC_JOBS_COMPLETED: &str = "bharatmart_jobs_completed_total";
pub const METRIC_JOBS_FAILED: &str = "bharatmart_jobs_failed_total";
pub const METRIC_JOBS_RETRIED: &str = "bharatmart_jobs_retried_total";
pub const METRIC_PAYMENTS_PROCESSED: &str = "bharatmart_payment_processed_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Responses served from the response cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cacheable requests that reached the handler."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATED,
            Unit::Count,
            "Cache keys removed by pattern invalidation."
        );
        describe_counter!(
            METRIC_RETRY_ATTEMPTS,
            Unit::Count,
            "Retries issued against remote dependencies."
        );
        describe_histogram!(
            METRIC_EXTERNAL_CALL_LATENCY,
            Unit::Milliseconds,
            "Latency of calls to remote dependencies in milliseconds."
        );
        describe_counter!(
            METRIC_EXTERNAL_CALL_ERRORS,
            Unit::Count,
            "Calls to remote dependencies that returned an error."
        );
        describe_counter!(
            METRIC_JOBS_COMPLETED,
            Unit::Count,
            "Background jobs that finished successfully."
        );
        describe_counter!(
            METRIC_JOBS_FAILED,
            Unit::Count,
            "Background job attempts that returned an error."
        );
        describe_counter!(
            METRIC_JOBS_RETRIED,
            Unit::Count,
            "Background jobs rescheduled after a failed attempt."
        );
        describe_counter!(
            METRIC_PAYMENTS_PROCESSED,
            Unit::Count,
            "Payments processed by the payment worker, labelled by outcome."
        );
    });
}
