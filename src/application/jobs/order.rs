use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    adapters::{
        database::{DatabaseError, Row, SelectOptions},
        workers::{JobContext, JobError},
    },
    cache::invalidate_order,
    domain::{
        jobs::{EmailNotificationJob, OrderItem, OrderProcessingJob},
        types::{EmailKind, OrderStatus},
    },
    util::timestamp::now_rfc3339,
};

use super::context::WorkerContext;

const SOURCE: &str = "bharatmart::jobs::order";

#[instrument(
    skip_all,
    fields(job_id = %ctx.job.id, order_id = %job.order_id, attempt = ctx.job.attempts_made)
)]
pub(super) async fn process_order(
    worker: &WorkerContext,
    ctx: &JobContext,
    job: OrderProcessingJob,
) -> Result<(), JobError> {
    info!(
        target = SOURCE,
        user_id = %job.user_id,
        total_amount = job.total_amount,
        items = job.items.len(),
        "processing order"
    );
    ctx.progress(10).await;

    let order = worker
        .database
        .select(
            "orders",
            &SelectOptions::new().filter("id", job.order_id.clone()).limit(1),
        )
        .await
        .map_err(|err| JobError::step("load order", err))?;
    if order.first().is_none() {
        return Err(JobError::rejected(format!("order {} not found", job.order_id)));
    }
    ctx.progress(30).await;

    for item in &job.items {
        check_stock(worker, item).await;
    }
    ctx.progress(60).await;

    let mut changes = Row::new();
    changes.insert("status".into(), json!(OrderStatus::Processing.as_str()));
    changes.insert("updated_at".into(), json!(now_rfc3339()));
    worker
        .database
        .update("orders", &job.order_id, &changes)
        .await
        .map_err(|err| JobError::step("mark order processing", err))?;
    invalidate_order(worker.cache.as_ref(), &job.order_id).await;
    ctx.progress(80).await;

    let confirmation = EmailNotificationJob {
        to: format!("user-{}@example.com", job.user_id),
        subject: "Order Confirmation".into(),
        body: format!(
            "Your order {} has been received and is being processed.",
            job.order_id
        ),
        kind: EmailKind::OrderConfirmation,
        order_id: Some(job.order_id.clone()),
    };
    worker
        .queue
        .enqueue_email(&confirmation)
        .await
        .map_err(|err| JobError::step("enqueue confirmation email", err))?;
    ctx.progress(100).await;

    info!(target = SOURCE, "order processed");
    Ok(())
}

/// Stock problems never fail the order; they are left for an operator.
async fn check_stock(worker: &WorkerContext, item: &OrderItem) {
    match available_stock(worker, item).await {
        Ok(Some(available)) if available >= item.quantity => {}
        Ok(Some(available)) => warn!(
            target = SOURCE,
            product_id = %item.product_id,
            requested = item.quantity,
            available,
            "insufficient stock"
        ),
        Ok(None) => warn!(
            target = SOURCE,
            product_id = %item.product_id,
            "stock check skipped, product not found"
        ),
        Err(err) => warn!(
            target = SOURCE,
            product_id = %item.product_id,
            error = %err,
            "stock check failed"
        ),
    }
}

async fn available_stock(
    worker: &WorkerContext,
    item: &OrderItem,
) -> Result<Option<i64>, DatabaseError> {
    let product = worker
        .database
        .select(
            "products",
            &SelectOptions::new()
                .columns(["id", "stock_quantity"])
                .filter("id", item.product_id.clone())
                .limit(1),
        )
        .await?;
    Ok(product
        .first()
        .map(|row| row.get("stock_quantity").and_then(Value::as_i64).unwrap_or(0)))
}
