use metrics::counter;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::{
    adapters::{
        database::Row,
        workers::{JobContext, JobError},
    },
    cache::invalidate_order,
    domain::{
        jobs::{EmailNotificationJob, PaymentProcessingJob},
        types::{EmailKind, OrderStatus, PaymentStatus},
    },
    infra::telemetry::METRIC_PAYMENTS_PROCESSED,
    util::timestamp::now_rfc3339,
};

use super::{context::WorkerContext, gateway::transaction_id};

const SOURCE: &str = "bharatmart::jobs::payment";

#[instrument(
    skip_all,
    fields(job_id = %ctx.job.id, order_id = %payment.order_id, attempt = ctx.job.attempts_made)
)]
pub(super) async fn process_payment(
    worker: &WorkerContext,
    ctx: &JobContext,
    payment: PaymentProcessingJob,
) -> Result<(), JobError> {
    info!(
        target = SOURCE,
        amount = payment.amount,
        payment_method = %payment.payment_method,
        "processing payment"
    );

    match charge_and_record(worker, ctx, &payment).await {
        Ok(()) => {
            counter!(METRIC_PAYMENTS_PROCESSED, "status" => PaymentStatus::Completed.as_str())
                .increment(1);
            info!(target = SOURCE, "payment processed");
            Ok(())
        }
        Err(err) => {
            error!(
                target = SOURCE,
                error = %err,
                failure_kind = "job_processing",
                "payment failed, compensating"
            );
            compensate(worker, &payment).await;
            counter!(METRIC_PAYMENTS_PROCESSED, "status" => PaymentStatus::Failed.as_str())
                .increment(1);
            Err(err)
        }
    }
}

async fn charge_and_record(
    worker: &WorkerContext,
    ctx: &JobContext,
    payment: &PaymentProcessingJob,
) -> Result<(), JobError> {
    ctx.progress(20).await;
    worker
        .gateway
        .charge(payment)
        .await
        .map_err(|err| JobError::step("charge", err))?;
    ctx.progress(50).await;

    let row = payment_row(
        payment,
        PaymentStatus::Completed,
        Value::String(transaction_id()),
    );
    worker
        .database
        .insert("payments", &row)
        .await
        .map_err(|err| JobError::step("record payment", err))?;
    ctx.progress(70).await;

    worker
        .database
        .update(
            "orders",
            &payment.order_id,
            &status_change(OrderStatus::Completed),
        )
        .await
        .map_err(|err| JobError::step("mark order completed", err))?;
    invalidate_order(worker.cache.as_ref(), &payment.order_id).await;
    ctx.progress(90).await;

    let receipt = EmailNotificationJob {
        to: recipient(payment),
        subject: "Payment Successful".into(),
        body: format!(
            "Your payment of ${} for order {} was successful.",
            payment.amount, payment.order_id
        ),
        kind: EmailKind::PaymentSuccess,
        order_id: Some(payment.order_id.clone()),
    };
    worker
        .queue
        .enqueue_email(&receipt)
        .await
        .map_err(|err| JobError::step("enqueue receipt email", err))?;
    ctx.progress(100).await;
    Ok(())
}

/// Best effort: each step runs even if an earlier one failed.
async fn compensate(worker: &WorkerContext, payment: &PaymentProcessingJob) {
    let failed_row = payment_row(payment, PaymentStatus::Failed, Value::Null);
    if let Err(err) = worker.database.insert("payments", &failed_row).await {
        compensation_failed("record_failed_payment", &err);
    }

    if let Err(err) = worker
        .database
        .update(
            "orders",
            &payment.order_id,
            &status_change(OrderStatus::PaymentFailed),
        )
        .await
    {
        compensation_failed("mark_order_payment_failed", &err);
    }
    invalidate_order(worker.cache.as_ref(), &payment.order_id).await;

    let notice = EmailNotificationJob {
        to: recipient(payment),
        subject: "Payment Failed".into(),
        body: format!(
            "Your payment of ${} for order {} failed. Please try again.",
            payment.amount, payment.order_id
        ),
        kind: EmailKind::PaymentFailed,
        order_id: Some(payment.order_id.clone()),
    };
    if let Err(err) = worker.queue.enqueue_email(&notice).await {
        compensation_failed("enqueue_failure_email", &err);
    }
}

fn compensation_failed(step: &'static str, err: &dyn std::error::Error) {
    error!(
        target = SOURCE,
        compensation_step = step,
        error = %err,
        failure_kind = "compensation",
        "compensation step failed"
    );
}

fn payment_row(payment: &PaymentProcessingJob, status: PaymentStatus, transaction: Value) -> Row {
    let mut row = Row::new();
    row.insert("order_id".into(), json!(payment.order_id));
    row.insert("amount".into(), json!(payment.amount));
    row.insert("payment_method".into(), json!(payment.payment_method));
    row.insert("status".into(), json!(status.as_str()));
    row.insert("transaction_id".into(), transaction);
    row
}

fn status_change(status: OrderStatus) -> Row {
    let mut row = Row::new();
    row.insert("status".into(), json!(status.as_str()));
    row.insert("updated_at".into(), json!(now_rfc3339()));
    row
}

fn recipient(payment: &PaymentProcessingJob) -> String {
    format!("user-{}@example.com", payment.user_id)
}
