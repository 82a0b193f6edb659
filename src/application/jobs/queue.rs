use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::{
    adapters::workers::{
        JobOptions, QueueStats, WorkerAdapter, WorkerError,
        policy::{EMAIL_PRIORITY, ORDER_PRIORITY, PAYMENT_PRIORITY, URGENT_EMAIL_PRIORITY},
    },
    domain::{
        jobs::{EmailNotificationJob, JobPayload, OrderProcessingJob, PaymentProcessingJob},
        types::{EmailKind, JobType},
    },
};

const SOURCE: &str = "bharatmart::jobs::queue";

/// Typed producer over the configured worker adapter.
#[derive(Clone)]
pub struct JobQueue {
    workers: Arc<dyn WorkerAdapter>,
}

/// Counts per queue plus their sum, as reported by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueOverview {
    pub orders: QueueStats,
    pub emails: QueueStats,
    pub payments: QueueStats,
    pub total: QueueStats,
}

impl JobQueue {
    pub fn new(workers: Arc<dyn WorkerAdapter>) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> &Arc<dyn WorkerAdapter> {
        &self.workers
    }

    pub async fn enqueue<P: JobPayload>(
        &self,
        payload: &P,
        options: JobOptions,
    ) -> Result<String, WorkerError> {
        let value = serde_json::to_value(payload)
            .map_err(|err| WorkerError::Serialization(err.to_string()))?;
        let id = self.workers.add_job(P::JOB_TYPE, value, options).await?;
        debug!(
            target = SOURCE,
            job_type = P::JOB_TYPE.as_str(),
            job_id = %id,
            backend = self.workers.backend().as_str(),
            "job enqueued"
        );
        Ok(id)
    }

    pub async fn enqueue_order(&self, job: &OrderProcessingJob) -> Result<String, WorkerError> {
        self.enqueue(job, JobOptions::with_priority(ORDER_PRIORITY))
            .await
    }

    pub async fn enqueue_payment(&self, job: &PaymentProcessingJob) -> Result<String, WorkerError> {
        self.enqueue(job, JobOptions::with_priority(PAYMENT_PRIORITY))
            .await
    }

    /// Failed-payment notices jump ahead of the other emails.
    pub async fn enqueue_email(&self, job: &EmailNotificationJob) -> Result<String, WorkerError> {
        let priority = match job.kind {
            EmailKind::PaymentFailed => URGENT_EMAIL_PRIORITY,
            _ => EMAIL_PRIORITY,
        };
        self.enqueue(job, JobOptions::with_priority(priority)).await
    }

    pub async fn overview(&self) -> Result<QueueOverview, WorkerError> {
        let orders = self.workers.job_type_stats(JobType::Order).await?;
        let emails = self.workers.job_type_stats(JobType::Email).await?;
        let payments = self.workers.job_type_stats(JobType::Payment).await?;
        Ok(QueueOverview {
            orders,
            emails,
            payments,
            total: orders + emails + payments,
        })
    }
}
