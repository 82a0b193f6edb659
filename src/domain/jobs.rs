//! Job payloads carried through the worker adapters.
//!
//! Field names are camelCase on the wire so jobs produced by other services stay readable.

use serde::{Deserialize, Serialize};

use super::types::{EmailKind, JobType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderProcessingJob {
    pub order_id: String,
    pub user_id: String,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessingJob {
    pub order_id: String,
    pub amount: f64,
    pub payment_method: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotificationJob {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: EmailKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Typed payload with a fixed job type.
pub trait JobPayload: Serialize {
    const JOB_TYPE: JobType;
}

impl JobPayload for OrderProcessingJob {
    const JOB_TYPE: JobType = JobType::Order;
}

impl JobPayload for PaymentProcessingJob {
    const JOB_TYPE: JobType = JobType::Payment;
}

impl JobPayload for EmailNotificationJob {
    const JOB_TYPE: JobType = JobType::Email;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_payload_uses_type_field() {
        let job = EmailNotificationJob {
            to: "user-1@example.com".into(),
            subject: "Order Confirmed".into(),
            body: "thanks".into(),
            kind: EmailKind::OrderConfirmation,
            order_id: Some("o-1".into()),
        };
        let value = serde_json::to_value(&job).expect("serialize");
        assert_eq!(value["type"], "order_confirmation");
        assert_eq!(value["orderId"], "o-1");
    }

    #[test]
    fn order_payload_accepts_missing_items() {
        let job: OrderProcessingJob = serde_json::from_value(serde_json::json!({
            "orderId": "o-1",
            "userId": "u-1",
            "totalAmount": 12.5
        }))
        .expect("deserialize");
        assert!(job.items.is_empty());
    }
}
