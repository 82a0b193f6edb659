//! Background work: the typed producer and the order, payment and email workers.

mod context;
mod dispatch;
mod email;
mod gateway;
mod mailer;
mod order;
mod payment;
mod queue;

pub use context::WorkerContext;
pub use dispatch::JobDispatcher;
pub use gateway::{GatewayError, PaymentGateway, SimulatedGateway, transaction_id};
pub use mailer::{LogMailer, MailError, Mailer};
pub use queue::{JobQueue, QueueOverview};
