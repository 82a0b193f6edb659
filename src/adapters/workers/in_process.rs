use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    domain::types::{JobState, JobType},
    infra::telemetry::{METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED},
    util::lock,
};

use super::{
    Job, JobContext, JobHandler, JobOptions, ProgressReporter, QueueStats, WorkerAdapter,
    WorkerBackend, WorkerError, policy::default_priority, run_attempt,
};

const SOURCE: &str = "bharatmart::adapters::workers::in_process";

#[derive(Default)]
struct Counters {
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            waiting: 0,
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Runs every job immediately and waits for it before `add_job` returns. Single attempt, no
/// queueing.
pub struct InProcessWorker {
    handler: RwLock<Option<Arc<dyn JobHandler>>>,
    counters: [Counters; 3],
    next_id: AtomicU64,
}

impl Default for InProcessWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessWorker {
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
            counters: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }

    fn counters(&self, job_type: JobType) -> &Counters {
        let index = JobType::ALL
            .iter()
            .position(|candidate| *candidate == job_type)
            .unwrap_or_default();
        &self.counters[index]
    }
}

struct LogProgress;

#[async_trait]
impl ProgressReporter for LogProgress {
    async fn report(&self, job: &Job, percent: u8) {
        debug!(
            target = SOURCE,
            job_id = %job.id,
            job_type = %job.job_type,
            progress = percent,
            "job progress"
        );
    }
}

#[async_trait]
impl WorkerAdapter for InProcessWorker {
    fn backend(&self) -> WorkerBackend {
        WorkerBackend::InProcess
    }

    async fn add_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: JobOptions,
    ) -> Result<String, WorkerError> {
        let id = format!("inline-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler = lock::read(&self.handler, SOURCE).clone();
        let Some(handler) = handler else {
            warn!(target = SOURCE, job_id = %id, job_type = %job_type, "no handler registered, job dropped");
            return Ok(id);
        };

        let job = Job {
            id: id.clone(),
            job_type,
            payload,
            priority: options.priority.unwrap_or_else(|| default_priority(job_type)),
            attempts_made: 0,
            max_attempts: 1,
            state: JobState::Active,
            progress: 0,
            failed_reason: None,
        };

        debug!(target = SOURCE, job_id = %id, job_type = %job_type, "running job inline");
        let counters = self.counters(job_type);
        counters.active.fetch_add(1, Ordering::Relaxed);
        let outcome = run_attempt(handler, JobContext::new(job, Arc::new(LogProgress))).await;
        counters.active.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_JOBS_COMPLETED, "job_type" => job_type.as_str()).increment(1);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_JOBS_FAILED, "job_type" => job_type.as_str()).increment(1);
                error!(
                    target = SOURCE,
                    job_id = %id,
                    job_type = %job_type,
                    error = %err,
                    failure_kind = "job_processing",
                    "inline job failed"
                );
            }
        }
        Ok(id)
    }

    async fn process_jobs(&self, handler: Arc<dyn JobHandler>) -> Result<(), WorkerError> {
        *lock::write(&self.handler, SOURCE) = Some(handler);
        info!(target = SOURCE, "in-process worker ready, jobs run as they are added");
        Ok(())
    }

    async fn job_type_stats(&self, job_type: JobType) -> Result<QueueStats, WorkerError> {
        Ok(self.counters(job_type).snapshot())
    }

    async fn close(&self) {
        lock::write(&self.handler, SOURCE).take();
        info!(target = SOURCE, "in-process worker closed");
    }
}
