//! Redis layout, per job type under the queue namespace:
//!
//! * `{ns}:{type}:seq` id counter
//! * `{ns}:{type}:jobs` hash of id to job JSON
//! * `{ns}:{type}:waiting` sorted set scored by priority then arrival
//! * `{ns}:{type}:delayed` sorted set scored by due time in unix milliseconds
//! * `{ns}:{type}:active` set of claimed ids
//! * `{ns}:{type}:completed` and `{ns}:{type}:failed` capped lists, newest first
//!
//! `ZPOPMIN` and `ZREM` decide ownership, so concurrent consumers never share a job.

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    domain::types::{JobState, JobType},
    infra::redis::{RedisConnector, RedisFailure},
};

use super::{Job, JobStore, NewJob, QueueStats, WorkerError};

const SOURCE: &str = "bharatmart::adapters::workers::redis";
const PROMOTE_BATCH: isize = 100;
const PRIORITY_SPAN: f64 = 1e12;

pub struct RedisJobStore {
    connector: RedisConnector,
    namespace: String,
}

struct Keys {
    seq: String,
    jobs: String,
    waiting: String,
    delayed: String,
    active: String,
    completed: String,
    failed: String,
}

impl RedisJobStore {
    pub fn new(connector: RedisConnector, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        info!(
            target = SOURCE,
            url = %connector.display_url(),
            namespace = %namespace,
            "redis job store configured"
        );
        Self {
            connector,
            namespace,
        }
    }

    fn keys(&self, job_type: JobType) -> Keys {
        let base = format!("{}:{}", self.namespace, job_type.as_str());
        Keys {
            seq: format!("{base}:seq"),
            jobs: format!("{base}:jobs"),
            waiting: format!("{base}:waiting"),
            delayed: format!("{base}:delayed"),
            active: format!("{base}:active"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
        }
    }

    async fn load(&self, keys: &Keys, id: &str) -> Result<Option<Job>, WorkerError> {
        let raw: Option<String> = self
            .connector
            .query("hget", redis::cmd("HGET").arg(&keys.jobs).arg(id))
            .await
            .map_err(connectivity)?;
        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn save(&self, keys: &Keys, job: &Job) -> Result<(), WorkerError> {
        let _: () = self
            .connector
            .query(
                "hset",
                redis::cmd("HSET").arg(&keys.jobs).arg(&job.id).arg(encode(job)?),
            )
            .await
            .map_err(connectivity)?;
        Ok(())
    }

    async fn promote_due(&self, keys: &Keys) -> Result<(), WorkerError> {
        let due: Vec<String> = self
            .connector
            .query(
                "zrangebyscore",
                redis::cmd("ZRANGEBYSCORE")
                    .arg(&keys.delayed)
                    .arg("-inf")
                    .arg(now_millis())
                    .arg("LIMIT")
                    .arg(0)
                    .arg(PROMOTE_BATCH),
            )
            .await
            .map_err(connectivity)?;

        for id in due {
            let removed: i64 = self
                .connector
                .query("zrem", redis::cmd("ZREM").arg(&keys.delayed).arg(&id))
                .await
                .map_err(connectivity)?;
            if removed != 1 {
                continue;
            }
            let Some(mut job) = self.load(keys, &id).await? else {
                continue;
            };
            job.state = JobState::Waiting;
            self.save(keys, &job).await?;
            let _: () = self
                .connector
                .query(
                    "zadd",
                    redis::cmd("ZADD")
                        .arg(&keys.waiting)
                        .arg(waiting_score(&job))
                        .arg(&job.id),
                )
                .await
                .map_err(connectivity)?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        job: &Job,
        state: JobState,
        list: impl Fn(&Keys) -> &str,
        keep: usize,
    ) -> Result<(), WorkerError> {
        let keys = self.keys(job.job_type);
        let list = list(&keys);
        let mut done = job.clone();
        done.state = state;
        if state == JobState::Completed {
            done.progress = 100;
        }

        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(&keys.jobs)
            .arg(&done.id)
            .arg(encode(&done)?)
            .ignore()
            .cmd("SREM")
            .arg(&keys.active)
            .arg(&done.id)
            .ignore()
            .cmd("LPUSH")
            .arg(list)
            .arg(&done.id)
            .ignore();
        let _: () = self
            .connector
            .query_pipeline("finish", &pipe)
            .await
            .map_err(connectivity)?;

        let keep = keep.max(1) as isize;
        let evicted: Vec<String> = self
            .connector
            .query("lrange", redis::cmd("LRANGE").arg(list).arg(keep).arg(-1))
            .await
            .map_err(connectivity)?;
        if !evicted.is_empty() {
            let mut pipe = redis::pipe();
            pipe.cmd("HDEL")
                .arg(&keys.jobs)
                .arg(&evicted)
                .ignore()
                .cmd("LTRIM")
                .arg(list)
                .arg(0)
                .arg(keep - 1)
                .ignore();
            let _: () = self
                .connector
                .query_pipeline("retention", &pipe)
                .await
                .map_err(connectivity)?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn push(&self, new: NewJob) -> Result<Job, WorkerError> {
        let keys = self.keys(new.job_type);
        let seq: u64 = self
            .connector
            .query("incr", redis::cmd("INCR").arg(&keys.seq))
            .await
            .map_err(connectivity)?;

        let delay = new.delay.filter(|delay| !delay.is_zero());
        let job = Job {
            id: seq.to_string(),
            job_type: new.job_type,
            payload: new.payload,
            priority: new.priority,
            attempts_made: 0,
            max_attempts: new.max_attempts.max(1),
            state: if delay.is_some() {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            progress: 0,
            failed_reason: None,
        };

        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(&keys.jobs)
            .arg(&job.id)
            .arg(encode(&job)?)
            .ignore();
        match delay {
            Some(delay) => pipe
                .cmd("ZADD")
                .arg(&keys.delayed)
                .arg(due_millis(delay))
                .arg(&job.id)
                .ignore(),
            None => pipe
                .cmd("ZADD")
                .arg(&keys.waiting)
                .arg(waiting_score(&job))
                .arg(&job.id)
                .ignore(),
        };
        let _: () = self
            .connector
            .query_pipeline("push", &pipe)
            .await
            .map_err(connectivity)?;
        Ok(job)
    }

    async fn claim(&self, job_type: JobType) -> Result<Option<Job>, WorkerError> {
        let keys = self.keys(job_type);
        self.promote_due(&keys).await?;

        let popped: Vec<(String, f64)> = self
            .connector
            .query("zpopmin", redis::cmd("ZPOPMIN").arg(&keys.waiting).arg(1))
            .await
            .map_err(connectivity)?;
        let Some((id, _)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let _: i64 = self
            .connector
            .query("sadd", redis::cmd("SADD").arg(&keys.active).arg(&id))
            .await
            .map_err(connectivity)?;
        let Some(mut job) = self.load(&keys, &id).await? else {
            return Ok(None);
        };
        job.state = JobState::Active;
        self.save(&keys, &job).await?;
        Ok(Some(job))
    }

    async fn report_progress(&self, job: &Job, percent: u8) -> Result<(), WorkerError> {
        let mut current = job.clone();
        current.progress = percent;
        self.save(&self.keys(job.job_type), &current).await
    }

    async fn complete(&self, job: &Job, keep: usize) -> Result<(), WorkerError> {
        self.finish(job, JobState::Completed, |keys| keys.completed.as_str(), keep)
            .await
    }

    async fn retry(&self, job: &Job, delay: Duration) -> Result<(), WorkerError> {
        let keys = self.keys(job.job_type);
        let mut again = job.clone();
        again.state = JobState::Delayed;

        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(&keys.jobs)
            .arg(&again.id)
            .arg(encode(&again)?)
            .ignore()
            .cmd("SREM")
            .arg(&keys.active)
            .arg(&again.id)
            .ignore()
            .cmd("ZADD")
            .arg(&keys.delayed)
            .arg(due_millis(delay))
            .arg(&again.id)
            .ignore();
        let _: () = self
            .connector
            .query_pipeline("retry", &pipe)
            .await
            .map_err(connectivity)?;
        Ok(())
    }

    async fn fail(&self, job: &Job, keep: usize) -> Result<(), WorkerError> {
        self.finish(job, JobState::Failed, |keys| keys.failed.as_str(), keep)
            .await
    }

    async fn counts(&self, job_type: JobType) -> Result<QueueStats, WorkerError> {
        let keys = self.keys(job_type);
        let mut pipe = redis::pipe();
        pipe.cmd("ZCARD")
            .arg(&keys.waiting)
            .cmd("ZCARD")
            .arg(&keys.delayed)
            .cmd("SCARD")
            .arg(&keys.active)
            .cmd("LLEN")
            .arg(&keys.completed)
            .cmd("LLEN")
            .arg(&keys.failed);
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) = self
            .connector
            .query_pipeline("counts", &pipe)
            .await
            .map_err(connectivity)?;
        Ok(QueueStats {
            waiting: waiting + delayed,
            active,
            completed,
            failed,
        })
    }

    async fn find(&self, job_type: JobType, id: &str) -> Result<Option<Job>, WorkerError> {
        self.load(&self.keys(job_type), id).await
    }

    async fn close(&self) {
        self.connector.close().await;
    }
}

fn connectivity(err: RedisFailure) -> WorkerError {
    match err {
        RedisFailure::Closed => WorkerError::Closed,
        other => WorkerError::Connectivity(other.to_string()),
    }
}

fn encode(job: &Job) -> Result<String, WorkerError> {
    serde_json::to_string(job).map_err(|err| WorkerError::Serialization(err.to_string()))
}

fn decode(raw: &str) -> Result<Job, WorkerError> {
    serde_json::from_str(raw).map_err(|err| WorkerError::Serialization(err.to_string()))
}

/// Lower priority first, then arrival order.
fn waiting_score(job: &Job) -> f64 {
    let seq = job.id.parse::<u64>().unwrap_or_default();
    f64::from(job.priority) * PRIORITY_SPAN + seq as f64
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn due_millis(delay: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}
