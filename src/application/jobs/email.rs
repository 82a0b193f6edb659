use tracing::{info, instrument};

use crate::{
    adapters::workers::{JobContext, JobError},
    domain::jobs::EmailNotificationJob,
};

use super::context::WorkerContext;

const SOURCE: &str = "bharatmart::jobs::email";

#[instrument(skip_all, fields(job_id = %ctx.job.id, email_type = email.kind.as_str()))]
pub(super) async fn process_email(
    worker: &WorkerContext,
    ctx: &JobContext,
    email: EmailNotificationJob,
) -> Result<(), JobError> {
    let order_id = email.order_id.as_deref().unwrap_or("-");
    info!(target = SOURCE, to = %email.to, order_id, "sending email");
    ctx.progress(20).await;

    worker
        .mailer
        .send(&email)
        .await
        .map_err(|err| JobError::step("deliver email", err))?;
    ctx.progress(60).await;

    info!(target = SOURCE, order_id, "email delivered");
    ctx.progress(100).await;
    Ok(())
}
