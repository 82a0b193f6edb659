//! Shared domain enumerations stored in rows and job payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Background job categories. Each category is its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Email,
    Order,
    Payment,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Email, JobType::Order, JobType::Payment];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Email => "email",
            JobType::Order => "order",
            JobType::Payment => "payment",
        }
    }

    /// Plural name used when reporting queue statistics.
    pub fn queue_name(self) -> &'static str {
        match self {
            JobType::Email => "emails",
            JobType::Order => "orders",
            JobType::Payment => "payments",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "email" => Ok(JobType::Email),
            "order" => Ok(JobType::Order),
            "payment" => Ok(JobType::Payment),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl TryFrom<&str> for JobState {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(()),
        }
    }
}

/// Order lifecycle as stored in `orders.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Completed,
    PaymentFailed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Completed => "completed",
            OrderStatus::PaymentFailed => "payment_failed",
        }
    }

    /// Statuses an operator may set through the API. The remaining ones are owned by workers.
    pub fn is_user_assignable(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Processing
                | OrderStatus::Shipped
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
        )
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "completed" => Ok(OrderStatus::Completed),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Notification templates the email worker knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    OrderConfirmation,
    PaymentSuccess,
    PaymentFailed,
}

impl EmailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailKind::OrderConfirmation => "order_confirmation",
            EmailKind::PaymentSuccess => "payment_success",
            EmailKind::PaymentFailed => "payment_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_str() {
        for job_type in JobType::ALL {
            assert_eq!(JobType::try_from(job_type.as_str()), Ok(job_type));
        }
        assert!(JobType::try_from("sms").is_err());
    }

    #[test]
    fn worker_owned_statuses_are_not_user_assignable() {
        assert!(OrderStatus::Shipped.is_user_assignable());
        assert!(!OrderStatus::PaymentFailed.is_user_assignable());
        assert!(!OrderStatus::Completed.is_user_assignable());
    }

    #[test]
    fn email_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EmailKind::PaymentFailed).expect("serialize");
        assert_eq!(json, "\"payment_failed\"");
    }
}
