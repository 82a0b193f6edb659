//! Worker capability: run jobs inline, hand them to a persistent queue, or drop them.
//!
//! Producers only see [`WorkerAdapter::add_job`]; consumers register one [`JobHandler`] through
//! [`WorkerAdapter::process_jobs`]. Retry, backoff and retention are decided per job type by
//! [`policy::JobPolicy`] and only apply to the queue-backed variant.

mod in_process;
mod noop;
pub mod policy;
mod queue;
mod redis_store;
mod store;

use std::{any::Any, ops::Add, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::Instrument;

use crate::domain::types::{JobState, JobType};

pub use in_process::InProcessWorker;
pub use noop::NoOpWorker;
pub use queue::QueueWorker;
pub use redis_store::RedisJobStore;
pub use store::{JobStore, MemoryJobStore, NewJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerBackend {
    InProcess,
    Queue,
    NoOp,
}

impl WorkerBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerBackend::InProcess => "in-process",
            WorkerBackend::Queue => "queue",
            WorkerBackend::NoOp => "none",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue backend unreachable: {0}")]
    Connectivity(String),
    #[error("job could not be encoded: {0}")]
    Serialization(String),
    #[error("worker has been closed")]
    Closed,
}

/// Why a single job attempt did not succeed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid {job_type} payload: {message}")]
    InvalidPayload { job_type: JobType, message: String },
    #[error("no handler for {0} jobs in this process")]
    Unhandled(JobType),
    #[error("{0}")]
    Rejected(String),
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn rejected(message: impl Into<String>) -> Self {
        JobError::Rejected(message.into())
    }

    pub fn step<E>(step: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        JobError::Step {
            step,
            source: Box::new(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub payload: Value,
    pub priority: u32,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub state: JobState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub failed_reason: Option<String>,
}

impl Job {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.payload.clone()).map_err(|err| JobError::InvalidPayload {
            job_type: self.job_type,
            message: err.to_string(),
        })
    }

    /// True when a failure of the running attempt exhausts the retry ceiling.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }
}

/// Producer-side overrides. Anything left `None` comes from the job type's policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub priority: Option<u32>,
    pub attempts: Option<u32>,
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn with_priority(priority: u32) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl Add for QueueStats {
    type Output = QueueStats;

    fn add(self, rhs: QueueStats) -> QueueStats {
        QueueStats {
            waiting: self.waiting + rhs.waiting,
            active: self.active + rhs.active,
            completed: self.completed + rhs.completed,
            failed: self.failed + rhs.failed,
        }
    }
}

impl std::iter::Sum for QueueStats {
    fn sum<I: Iterator<Item = QueueStats>>(iter: I) -> Self {
        iter.fold(QueueStats::default(), Add::add)
    }
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, job: &Job, percent: u8);
}

/// What a handler sees while running one attempt.
pub struct JobContext {
    pub job: Job,
    reporter: Arc<dyn ProgressReporter>,
}

impl JobContext {
    pub fn new(job: Job, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self { job, reporter }
    }

    pub async fn progress(&self, percent: u8) {
        self.reporter.report(&self.job, percent.min(100)).await;
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Run one attempt on its own task. A panicking handler fails the attempt and leaves the
/// calling worker intact.
pub(crate) async fn run_attempt(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
) -> Result<(), JobError> {
    let attempt = tokio::spawn(async move { handler.handle(&ctx).await }.in_current_span());
    match attempt.await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(JobError::Panicked(panic_message(err.into_panic()))),
        Err(err) => Err(JobError::rejected(format!("attempt aborted: {err}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map(|message| (*message).to_string())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    }
}

#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    fn backend(&self) -> WorkerBackend;

    /// Submit a job and return its id.
    async fn add_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: JobOptions,
    ) -> Result<String, WorkerError>;

    /// Register the handler that consumes jobs. Queue-backed workers start polling here.
    async fn process_jobs(&self, handler: Arc<dyn JobHandler>) -> Result<(), WorkerError>;

    async fn job_type_stats(&self, job_type: JobType) -> Result<QueueStats, WorkerError>;

    async fn queue_stats(&self) -> Result<QueueStats, WorkerError> {
        let mut total = QueueStats::default();
        for job_type in JobType::ALL {
            total = total + self.job_type_stats(job_type).await?;
        }
        Ok(total)
    }

    /// Look up a retained job. Backends without persistence return `None`.
    async fn find_job(&self, _job_type: JobType, _id: &str) -> Result<Option<Job>, WorkerError> {
        Ok(None)
    }

    async fn close(&self);
}
