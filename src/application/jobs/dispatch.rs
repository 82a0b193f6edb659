use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    adapters::workers::{JobContext, JobError, JobHandler},
    domain::types::JobType,
};

use super::{context::WorkerContext, email, order, payment};

/// Routes each job to its worker by type. Types outside `enabled` are refused.
pub struct JobDispatcher {
    context: Arc<WorkerContext>,
    enabled: BTreeSet<JobType>,
}

impl JobDispatcher {
    pub fn new(context: Arc<WorkerContext>, enabled: BTreeSet<JobType>) -> Self {
        Self { context, enabled }
    }

    pub fn all(context: Arc<WorkerContext>) -> Self {
        Self::new(context, JobType::ALL.into_iter().collect())
    }

    pub fn handles(&self, job_type: JobType) -> bool {
        self.enabled.contains(&job_type)
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        let job_type = ctx.job.job_type;
        if !self.handles(job_type) {
            return Err(JobError::Unhandled(job_type));
        }

        match job_type {
            JobType::Order => order::process_order(&self.context, ctx, ctx.job.payload_as()?).await,
            JobType::Payment => {
                payment::process_payment(&self.context, ctx, ctx.job.payload_as()?).await
            }
            JobType::Email => email::process_email(&self.context, ctx, ctx.job.payload_as()?).await,
        }
    }
}
