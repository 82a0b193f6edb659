use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::types::JobType;

use super::{JobHandler, JobOptions, QueueStats, WorkerAdapter, WorkerBackend, WorkerError};

const SOURCE: &str = "bharatmart::adapters::workers::noop";

/// Background processing disabled: jobs are discarded.
#[derive(Debug, Default)]
pub struct NoOpWorker;

#[async_trait]
impl WorkerAdapter for NoOpWorker {
    fn backend(&self) -> WorkerBackend {
        WorkerBackend::NoOp
    }

    async fn add_job(
        &self,
        job_type: JobType,
        _payload: Value,
        _options: JobOptions,
    ) -> Result<String, WorkerError> {
        debug!(target = SOURCE, job_type = %job_type, "workers disabled, job discarded");
        Ok(String::new())
    }

    async fn process_jobs(&self, _handler: Arc<dyn JobHandler>) -> Result<(), WorkerError> {
        info!(target = SOURCE, "workers disabled, no jobs will be processed");
        Ok(())
    }

    async fn job_type_stats(&self, _job_type: JobType) -> Result<QueueStats, WorkerError> {
        Ok(QueueStats::default())
    }

    async fn close(&self) {}
}
