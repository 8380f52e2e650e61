use futures::future::BoxFuture;
use seatflow_core::{Money, PaymentError, PaymentMethod, PaymentPort, SagaId, TransactionId};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One recorded `charge` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeCall {
    /// Instrument charged
    pub method: PaymentMethod,
    /// Amount requested
    pub amount: Money,
    /// Saga reference passed to the gateway
    pub reference: SagaId,
}

#[derive(Debug, Default)]
struct Script {
    charges: VecDeque<Result<TransactionId, PaymentError>>,
    refunds: VecDeque<Result<(), PaymentError>>,
    charge_log: Vec<ChargeCall>,
    refund_log: Vec<TransactionId>,
    charge_delay: Duration,
    issued: u64,
}

/// Payment gateway double.
///
/// Outcomes are consumed in the order they were scripted. Once a queue is
/// empty, charges succeed with `tx-1`, `tx-2`, ... and refunds succeed.
#[derive(Debug, Default)]
pub struct ScriptedPaymentPort {
    script: Mutex<Script>,
}

impl ScriptedPaymentPort {
    /// A gateway that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted charge.
    pub fn script_charge(&self, outcome: Result<TransactionId, PaymentError>) {
        self.with(|s| s.charges.push_back(outcome));
    }

    /// Queue the outcome of the next unscripted refund.
    pub fn script_refund(&self, outcome: Result<(), PaymentError>) {
        self.with(|s| s.refunds.push_back(outcome));
    }

    /// Delay every charge by `delay` before answering.
    pub fn set_charge_delay(&self, delay: Duration) {
        self.with(|s| s.charge_delay = delay);
    }

    /// Every charge call, including failed and timed-out ones.
    #[must_use]
    pub fn charges(&self) -> Vec<ChargeCall> {
        self.with(|s| s.charge_log.clone())
    }

    /// Every refund call, including failed ones.
    #[must_use]
    pub fn refunds(&self) -> Vec<TransactionId> {
        self.with(|s| s.refund_log.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut script)
    }
}

impl PaymentPort for ScriptedPaymentPort {
    fn charge(
        &self,
        method: PaymentMethod,
        amount: Money,
        reference: SagaId,
    ) -> BoxFuture<'_, Result<TransactionId, PaymentError>> {
        let (outcome, delay) = self.with(|s| {
            s.charge_log.push(ChargeCall {
                method,
                amount,
                reference,
            });
            let outcome = s.charges.pop_front().unwrap_or_else(|| {
                s.issued += 1;
                Ok(TransactionId::new(format!("tx-{}", s.issued)))
            });
            (outcome, s.charge_delay)
        });
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }

    fn refund(&self, transaction_id: TransactionId) -> BoxFuture<'_, Result<(), PaymentError>> {
        let outcome = self.with(|s| {
            s.refund_log.push(transaction_id);
            s.refunds.pop_front().unwrap_or(Ok(()))
        });
        Box::pin(async move { outcome })
    }
}
