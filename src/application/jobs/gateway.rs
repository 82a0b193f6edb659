use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::domain::jobs::PaymentProcessingJob;

const SOURCE: &str = "bharatmart::jobs::gateway";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway declined transaction")]
    Declined,
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, payment: &PaymentProcessingJob) -> Result<(), GatewayError>;
}

/// Stand-in gateway that declines a fixed share of charges after a short delay.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedGateway {
    decline_rate: f64,
    latency: Duration,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(0.1, Duration::from_secs(2))
    }
}

impl SimulatedGateway {
    pub fn new(decline_rate: f64, latency: Duration) -> Self {
        Self {
            decline_rate: decline_rate.clamp(0.0, 1.0),
            latency,
        }
    }

    pub fn always_approve() -> Self {
        Self::new(0.0, Duration::ZERO)
    }

    pub fn always_decline() -> Self {
        Self::new(1.0, Duration::ZERO)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, payment: &PaymentProcessingJob) -> Result<(), GatewayError> {
        let declined = rand::thread_rng().gen_bool(self.decline_rate);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        debug!(
            target = SOURCE,
            order_id = %payment.order_id,
            amount = payment.amount,
            declined,
            "simulated charge"
        );
        if declined {
            Err(GatewayError::Declined)
        } else {
            Ok(())
        }
    }
}

/// `txn_{unix millis}_{9 base36 chars}`.
pub fn transaction_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    format!("txn_{millis}_{suffix}")
}
