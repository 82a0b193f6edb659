use std::sync::Arc;

use crate::adapters::{cache::CacheAdapter, database::DatabaseAdapter};

use super::{
    gateway::{PaymentGateway, SimulatedGateway},
    mailer::{LogMailer, Mailer},
    queue::JobQueue,
};

/// Everything a job handler may touch.
#[derive(Clone)]
pub struct WorkerContext {
    pub database: Arc<dyn DatabaseAdapter>,
    /// Response cache shared with the HTTP surface; handlers invalidate what they change.
    pub cache: Arc<dyn CacheAdapter>,
    pub queue: JobQueue,
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
}

impl WorkerContext {
    /// Context with the simulated gateway and the logging mailer.
    pub fn new(
        database: Arc<dyn DatabaseAdapter>,
        cache: Arc<dyn CacheAdapter>,
        queue: JobQueue,
    ) -> Self {
        Self {
            database,
            cache,
            queue,
            gateway: Arc::new(SimulatedGateway::default()),
            mailer: Arc::new(LogMailer::default()),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}
