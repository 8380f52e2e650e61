//! External ports consumed by the coordinator and the outbox relay.
//!
//! Both traits return boxed futures instead of using `async fn` so they stay
//! dyn-compatible and can be injected as `Arc<dyn PaymentPort>`.

use crate::types::{Money, PaymentMethod, SagaId, TransactionId};
use futures::future::BoxFuture;
use thiserror::Error;

/// Payment gateway errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The gateway refused the charge
    #[error("Payment declined: {0}")]
    Declined(String),

    /// No answer within the allotted time
    #[error("Payment gateway timeout")]
    GatewayTimeout,

    /// The gateway could not be reached
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

impl PaymentError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::GatewayTimeout | Self::GatewayUnavailable(_))
    }
}

/// Payment gateway abstraction.
///
/// `reference` is the saga id; gateways use it to deduplicate charges that
/// are retried after an ambiguous timeout.
pub trait PaymentPort: Send + Sync {
    /// Charge `amount` to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the charge was not captured.
    fn charge(
        &self,
        method: PaymentMethod,
        amount: Money,
        reference: SagaId,
    ) -> BoxFuture<'_, Result<TransactionId, PaymentError>>;

    /// Refund a previous charge in full.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the refund was not accepted.
    fn refund(&self, transaction_id: TransactionId) -> BoxFuture<'_, Result<(), PaymentError>>;
}

/// Publish target errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Temporary failure; the entry is retried with backoff
    #[error("Transient publish failure: {0}")]
    TransientFailure(String),

    /// The payload can never be delivered; the entry is parked immediately
    #[error("Permanent publish failure: {0}")]
    PermanentFailure(String),
}

/// External publish target (message broker, webhook fan-out, ...).
pub trait PublishPort: Send + Sync {
    /// Publish `payload` to `topic`.
    ///
    /// `key` is the partition key so brokers that partition by key keep the
    /// per-partition order the relay established.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if delivery was not acknowledged.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), PublishError>>;
}
