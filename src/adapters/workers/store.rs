//! Persistence seam for the queue-backed worker.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    domain::types::{JobState, JobType},
    util::lock,
};

use super::{Job, QueueStats, WorkerError};

const SOURCE: &str = "bharatmart::adapters::workers::store";

/// A job as submitted by a producer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: Value,
    pub priority: u32,
    pub max_attempts: u32,
    pub delay: Option<Duration>,
}

/// Storage for queued jobs. `claim` must hand each job to exactly one caller.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn push(&self, job: NewJob) -> Result<Job, WorkerError>;

    /// Move due delayed jobs to waiting, then take the highest priority waiting job.
    async fn claim(&self, job_type: JobType) -> Result<Option<Job>, WorkerError>;

    async fn report_progress(&self, job: &Job, percent: u8) -> Result<(), WorkerError>;

    /// Mark `job` completed and keep at most `keep` completed jobs of its type.
    async fn complete(&self, job: &Job, keep: usize) -> Result<(), WorkerError>;

    /// Put `job` back to run again after `delay`.
    async fn retry(&self, job: &Job, delay: Duration) -> Result<(), WorkerError>;

    /// Mark `job` failed for good and keep at most `keep` failed jobs of its type.
    async fn fail(&self, job: &Job, keep: usize) -> Result<(), WorkerError>;

    async fn counts(&self, job_type: JobType) -> Result<QueueStats, WorkerError>;

    async fn find(&self, job_type: JobType, id: &str) -> Result<Option<Job>, WorkerError>;

    async fn close(&self) {}
}

#[derive(Default)]
struct TypeQueue {
    next_seq: u64,
    jobs: HashMap<String, (u64, Job)>,
    waiting: BTreeSet<(u32, u64)>,
    delayed: Vec<(Instant, u64)>,
    active: HashSet<u64>,
    completed: VecDeque<u64>,
    failed: VecDeque<u64>,
    by_seq: HashMap<u64, String>,
}

impl TypeQueue {
    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        for (_, seq) in due {
            if let Some(job) = self.job_mut(seq) {
                job.state = JobState::Waiting;
                let priority = job.priority;
                self.waiting.insert((priority, seq));
            }
        }
    }

    fn job_mut(&mut self, seq: u64) -> Option<&mut Job> {
        let id = self.by_seq.get(&seq)?;
        self.jobs.get_mut(id).map(|(_, job)| job)
    }

    fn store(&mut self, job: &Job) -> Option<u64> {
        let (seq, stored) = self.jobs.get_mut(&job.id)?;
        *stored = job.clone();
        Some(*seq)
    }

    fn retain(list: &mut VecDeque<u64>, keep: usize) -> Vec<u64> {
        let mut evicted = Vec::new();
        while list.len() > keep {
            if let Some(seq) = list.pop_front() {
                evicted.push(seq);
            }
        }
        evicted
    }

    fn forget(&mut self, seqs: Vec<u64>) {
        for seq in seqs {
            if let Some(id) = self.by_seq.remove(&seq) {
                self.jobs.remove(&id);
            }
        }
    }
}

/// Process-local job store, used by tests and single-node runs without Redis.
#[derive(Default)]
pub struct MemoryJobStore {
    queues: Mutex<HashMap<JobType, TypeQueue>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<R>(&self, job_type: JobType, f: impl FnOnce(&mut TypeQueue) -> R) -> R {
        let mut queues = lock::lock(&self.queues, SOURCE);
        f(queues.entry(job_type).or_default())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn push(&self, new: NewJob) -> Result<Job, WorkerError> {
        let now = Instant::now();
        Ok(self.with_queue(new.job_type, |queue| {
            queue.next_seq += 1;
            let seq = queue.next_seq;
            let delayed_until = new.delay.filter(|delay| !delay.is_zero()).map(|d| now + d);
            let job = Job {
                id: seq.to_string(),
                job_type: new.job_type,
                payload: new.payload,
                priority: new.priority,
                attempts_made: 0,
                max_attempts: new.max_attempts.max(1),
                state: if delayed_until.is_some() {
                    JobState::Delayed
                } else {
                    JobState::Waiting
                },
                progress: 0,
                failed_reason: None,
            };
            match delayed_until {
                Some(at) => queue.delayed.push((at, seq)),
                None => {
                    queue.waiting.insert((job.priority, seq));
                }
            }
            queue.by_seq.insert(seq, job.id.clone());
            queue.jobs.insert(job.id.clone(), (seq, job.clone()));
            job
        }))
    }

    async fn claim(&self, job_type: JobType) -> Result<Option<Job>, WorkerError> {
        let now = Instant::now();
        Ok(self.with_queue(job_type, |queue| {
            queue.promote_due(now);
            let (_, seq) = queue.waiting.pop_first()?;
            queue.active.insert(seq);
            let job = queue.job_mut(seq)?;
            job.state = JobState::Active;
            Some(job.clone())
        }))
    }

    async fn report_progress(&self, job: &Job, percent: u8) -> Result<(), WorkerError> {
        self.with_queue(job.job_type, |queue| {
            if let Some((_, stored)) = queue.jobs.get_mut(&job.id) {
                stored.progress = percent;
            }
        });
        Ok(())
    }

    async fn complete(&self, job: &Job, keep: usize) -> Result<(), WorkerError> {
        self.with_queue(job.job_type, |queue| {
            let mut done = job.clone();
            done.state = JobState::Completed;
            done.progress = 100;
            let Some(seq) = queue.store(&done) else {
                return;
            };
            queue.active.remove(&seq);
            queue.completed.push_back(seq);
            let evicted = TypeQueue::retain(&mut queue.completed, keep);
            queue.forget(evicted);
        });
        Ok(())
    }

    async fn retry(&self, job: &Job, delay: Duration) -> Result<(), WorkerError> {
        let due = Instant::now() + delay;
        self.with_queue(job.job_type, |queue| {
            let mut again = job.clone();
            again.state = JobState::Delayed;
            let Some(seq) = queue.store(&again) else {
                return;
            };
            queue.active.remove(&seq);
            queue.delayed.push((due, seq));
        });
        Ok(())
    }

    async fn fail(&self, job: &Job, keep: usize) -> Result<(), WorkerError> {
        self.with_queue(job.job_type, |queue| {
            let mut failed = job.clone();
            failed.state = JobState::Failed;
            let Some(seq) = queue.store(&failed) else {
                return;
            };
            queue.active.remove(&seq);
            queue.failed.push_back(seq);
            let evicted = TypeQueue::retain(&mut queue.failed, keep);
            queue.forget(evicted);
        });
        Ok(())
    }

    async fn counts(&self, job_type: JobType) -> Result<QueueStats, WorkerError> {
        Ok(self.with_queue(job_type, |queue| QueueStats {
            waiting: (queue.waiting.len() + queue.delayed.len()) as u64,
            active: queue.active.len() as u64,
            completed: queue.completed.len() as u64,
            failed: queue.failed.len() as u64,
        }))
    }

    async fn find(&self, job_type: JobType, id: &str) -> Result<Option<Job>, WorkerError> {
        Ok(self.with_queue(job_type, |queue| {
            queue.jobs.get(id).map(|(_, job)| job.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn new_job(job_type: JobType, priority: u32, tag: &str) -> NewJob {
        NewJob {
            job_type,
            payload: json!({ "tag": tag }),
            priority,
            max_attempts: 3,
            delay: None,
        }
    }

    #[tokio::test]
    async fn claims_follow_priority_then_insertion_order() {
        let store = MemoryJobStore::new();
        store.push(new_job(JobType::Email, 3, "a")).await.expect("push");
        store.push(new_job(JobType::Email, 2, "b")).await.expect("push");
        store.push(new_job(JobType::Email, 3, "c")).await.expect("push");

        let mut tags = Vec::new();
        while let Some(job) = store.claim(JobType::Email).await.expect("claim") {
            tags.push(job.payload["tag"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(tags, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn a_claimed_job_is_not_handed_out_twice() {
        let store = MemoryJobStore::new();
        store.push(new_job(JobType::Order, 1, "only")).await.expect("push");

        assert!(store.claim(JobType::Order).await.expect("claim").is_some());
        assert!(store.claim(JobType::Order).await.expect("claim").is_none());
        assert_eq!(store.counts(JobType::Order).await.expect("counts").active, 1);
    }

    #[tokio::test]
    async fn queues_are_independent_per_type() {
        let store = MemoryJobStore::new();
        store.push(new_job(JobType::Payment, 1, "p")).await.expect("push");

        assert!(store.claim(JobType::Order).await.expect("claim").is_none());
        assert!(store.claim(JobType::Payment).await.expect("claim").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_retry_becomes_claimable_when_due() {
        let store = MemoryJobStore::new();
        store.push(new_job(JobType::Order, 1, "r")).await.expect("push");
        let mut job = store.claim(JobType::Order).await.expect("claim").expect("job");
        job.attempts_made = 1;
        store.retry(&job, Duration::from_secs(2)).await.expect("retry");

        assert!(store.claim(JobType::Order).await.expect("claim").is_none());
        tokio::time::advance(Duration::from_secs(2)).await;
        let again = store.claim(JobType::Order).await.expect("claim").expect("due");
        assert_eq!(again.attempts_made, 1);
    }

    #[tokio::test]
    async fn completed_jobs_beyond_retention_are_forgotten() {
        let store = MemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let job = store
                .push(new_job(JobType::Email, 3, &i.to_string()))
                .await
                .expect("push");
            ids.push(job.id);
        }
        while let Some(job) = store.claim(JobType::Email).await.expect("claim") {
            store.complete(&job, 2).await.expect("complete");
        }

        assert_eq!(store.counts(JobType::Email).await.expect("counts").completed, 2);
        assert!(store.find(JobType::Email, &ids[0]).await.expect("find").is_none());
        let kept = store.find(JobType::Email, &ids[2]).await.expect("find").expect("kept");
        assert_eq!(kept.state, JobState::Completed);
    }
}
