use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    domain::types::JobType,
    infra::telemetry::{METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED, METRIC_JOBS_RETRIED},
};

use super::{
    Job, JobContext, JobHandler, JobOptions, JobStore, NewJob, ProgressReporter, QueueStats,
    WorkerAdapter, WorkerBackend, WorkerError,
    policy::{JobPolicy, default_priority},
    run_attempt,
};

const SOURCE: &str = "bharatmart::adapters::workers::queue";

/// Queue-backed worker. Producers push into a [`JobStore`]; `process_jobs` starts
/// `concurrency` consumers per enabled job type that poll the store until `close`.
pub struct QueueWorker {
    store: Arc<dyn JobStore>,
    concurrency: usize,
    poll_interval: Duration,
    job_types: BTreeSet<JobType>,
    shutdown: watch::Sender<bool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl QueueWorker {
    pub fn new(store: Arc<dyn JobStore>, concurrency: usize, poll_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            concurrency: concurrency.max(1),
            poll_interval,
            job_types: JobType::ALL.into_iter().collect(),
            shutdown,
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Only consume the given job types. Producers may still enqueue any type.
    pub fn with_job_types(mut self, job_types: BTreeSet<JobType>) -> Self {
        self.job_types = job_types;
        self
    }
}

struct StoreProgress {
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl ProgressReporter for StoreProgress {
    async fn report(&self, job: &Job, percent: u8) {
        if let Err(err) = self.store.report_progress(job, percent).await {
            debug!(target = SOURCE, job_id = %job.id, error = %err, "progress update dropped");
        }
    }
}

#[async_trait]
impl WorkerAdapter for QueueWorker {
    fn backend(&self) -> WorkerBackend {
        WorkerBackend::Queue
    }

    async fn add_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: JobOptions,
    ) -> Result<String, WorkerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WorkerError::Closed);
        }
        let policy = JobPolicy::for_type(job_type);
        let job = self
            .store
            .push(NewJob {
                job_type,
                payload,
                priority: options.priority.unwrap_or_else(|| default_priority(job_type)),
                max_attempts: options.attempts.unwrap_or(policy.attempts),
                delay: options.delay,
            })
            .await?;
        debug!(
            target = SOURCE,
            job_id = %job.id,
            job_type = %job_type,
            priority = job.priority,
            "job enqueued"
        );
        Ok(job.id)
    }

    async fn process_jobs(&self, handler: Arc<dyn JobHandler>) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WorkerError::Closed);
        }
        let mut consumers = self.consumers.lock().await;
        for job_type in &self.job_types {
            for slot in 0..self.concurrency {
                let consumer = Consumer {
                    job_type: *job_type,
                    store: self.store.clone(),
                    handler: handler.clone(),
                    poll_interval: self.poll_interval,
                    shutdown: self.shutdown.subscribe(),
                };
                let span = info_span!("job_consumer", job_type = %job_type, slot);
                consumers.push(tokio::spawn(consumer.run().instrument(span)));
            }
            info!(
                target = SOURCE,
                job_type = %job_type,
                concurrency = self.concurrency,
                "listening for jobs"
            );
        }
        Ok(())
    }

    async fn job_type_stats(&self, job_type: JobType) -> Result<QueueStats, WorkerError> {
        self.store.counts(job_type).await
    }

    async fn find_job(&self, job_type: JobType, id: &str) -> Result<Option<Job>, WorkerError> {
        self.store.find(job_type, id).await
    }

    /// Stops claiming new jobs and waits for in-flight ones to finish.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        for consumer in consumers {
            if let Err(err) = consumer.await {
                warn!(target = SOURCE, error = %err, "job consumer ended abnormally");
            }
        }
        self.store.close().await;
        info!(target = SOURCE, "queue worker closed");
    }
}

struct Consumer {
    job_type: JobType,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    async fn run(mut self) {
        while !*self.shutdown.borrow() {
            match self.store.claim(self.job_type).await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => self.idle().await,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        job_type = %self.job_type,
                        error = %err,
                        failure_kind = "connectivity",
                        "claiming job failed"
                    );
                    self.idle().await;
                }
            }
        }
    }

    async fn idle(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn execute(&self, job: Job) {
        let policy = JobPolicy::for_type(job.job_type);
        let reporter = Arc::new(StoreProgress {
            store: self.store.clone(),
        });
        let outcome = run_attempt(self.handler.clone(), JobContext::new(job.clone(), reporter)).await;
        let mut job = job;
        job.attempts_made += 1;
        let job_type = job.job_type.as_str();

        let stored = match outcome {
            Ok(()) => {
                counter!(METRIC_JOBS_COMPLETED, "job_type" => job_type).increment(1);
                info!(target = SOURCE, job_id = %job.id, job_type, attempts = job.attempts_made, "job completed");
                self.store.complete(&job, policy.keep_completed).await
            }
            Err(err) if job.attempts_made < job.max_attempts => {
                let delay = policy.backoff.delay_after(job.attempts_made);
                job.failed_reason = Some(err.to_string());
                counter!(METRIC_JOBS_RETRIED, "job_type" => job_type).increment(1);
                warn!(
                    target = SOURCE,
                    job_id = %job.id,
                    job_type,
                    attempts = job.attempts_made,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    failure_kind = "job_processing",
                    "job attempt failed, retrying"
                );
                self.store.retry(&job, delay).await
            }
            Err(err) => {
                job.failed_reason = Some(err.to_string());
                counter!(METRIC_JOBS_FAILED, "job_type" => job_type).increment(1);
                error!(
                    target = SOURCE,
                    job_id = %job.id,
                    job_type,
                    attempts = job.attempts_made,
                    error = %err,
                    failure_kind = "job_processing",
                    "job failed permanently"
                );
                self.store.fail(&job, policy.keep_failed).await
            }
        };

        if let Err(err) = stored {
            error!(
                target = SOURCE,
                job_id = %job.id,
                job_type,
                error = %err,
                failure_kind = "connectivity",
                "could not record job outcome"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use serde_json::json;

    use super::*;
    use crate::{
        adapters::workers::{JobError, MemoryJobStore},
        domain::types::JobState,
    };

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.progress(40).await;
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(JobError::rejected("transient"));
            }
            Ok(())
        }
    }

    async fn wait_for_state(
        worker: &QueueWorker,
        job_type: JobType,
        id: &str,
        state: JobState,
    ) -> Job {
        loop {
            if let Some(job) = worker.find_job(job_type, id).await.expect("find")
                && job.state == state
            {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let worker = QueueWorker::new(Arc::new(MemoryJobStore::new()), 1, Duration::from_millis(50));
        let handler = Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        worker.process_jobs(handler.clone()).await.expect("start");

        let id = worker
            .add_job(JobType::Order, json!({}), JobOptions::default())
            .await
            .expect("enqueue");
        let job = wait_for_state(&worker, JobType::Order, &id, JobState::Completed).await;

        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.progress, 100);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        worker.close().await;
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
            panic!("payload decoder bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_fails_the_job_and_keeps_consuming() {
        let worker = QueueWorker::new(Arc::new(MemoryJobStore::new()), 1, Duration::from_millis(50));
        worker.process_jobs(Arc::new(Panicking)).await.expect("start");

        let options = JobOptions {
            attempts: Some(1),
            ..JobOptions::default()
        };
        let first = worker
            .add_job(JobType::Email, json!({}), options)
            .await
            .expect("enqueue");
        let second = worker
            .add_job(JobType::Email, json!({}), options)
            .await
            .expect("enqueue");

        for id in [first, second] {
            let job = wait_for_state(&worker, JobType::Email, &id, JobState::Failed).await;
            assert_eq!(
                job.failed_reason.as_deref(),
                Some("handler panicked: payload decoder bug")
            );
        }
        worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_consumers_and_rejects_new_jobs() {
        let worker = QueueWorker::new(Arc::new(MemoryJobStore::new()), 2, Duration::from_millis(50));
        worker
            .process_jobs(Arc::new(Flaky {
                failures_left: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }))
            .await
            .expect("start");

        worker.close().await;
        let err = worker
            .add_job(JobType::Email, json!({}), JobOptions::default())
            .await
            .expect_err("closed");
        assert!(matches!(err, WorkerError::Closed));
    }
}
