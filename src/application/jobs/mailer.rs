use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domain::jobs::EmailNotificationJob;

const SOURCE: &str = "bharatmart::jobs::mailer";

#[derive(Debug, Error)]
#[error("email delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &EmailNotificationJob) -> Result<(), MailError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Clone, Copy)]
pub struct LogMailer {
    latency: Duration,
}

impl Default for LogMailer {
    fn default() -> Self {
        Self {
            latency: Duration::from_secs(1),
        }
    }
}

impl LogMailer {
    pub fn instant() -> Self {
        Self {
            latency: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &EmailNotificationJob) -> Result<(), MailError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        info!(
            target = SOURCE,
            to = %email.to,
            email_type = email.kind.as_str(),
            order_id = email.order_id.as_deref().unwrap_or("-"),
            subject = %email.subject,
            "email sent"
        );
        Ok(())
    }
}
