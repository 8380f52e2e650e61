//! Reservation coordinator.
//!
//! Drives one [`ReservationSaga`] per request through
//! `RESERVING -> CHARGING -> FINALIZING -> COMPLETED`. Any failure, including
//! an elapsed deadline, runs the compensations of the completed steps in
//! reverse order. The terminal transition and its outbox event are written
//! with a single [`SagaStore::commit`].
//!
//! Business failures (no capacity, declined card, timeouts) are not errors:
//! they come back as a saga in `COMPENSATED`. Only storage faults and
//! request-level problems are returned as [`CoordinatorError`].

use crate::HealthCheck;
use crate::config::CoordinatorConfig;
use crate::ledger::InventoryLedger;
use crate::metrics::SagaMetrics;
use crate::retry::retry_with_predicate;
use seatflow_core::environment::Clock;
use seatflow_core::store::{Claim, SagaStore, StoreError};
use seatflow_core::{
    CompensationData, DateTime, HoldToken, IdempotencyKey, InventoryError, OutboxMessage, PaymentError,
    PaymentMethod, PaymentPort, ReservationEvent, ReservationSaga, ResourceId, SagaError,
    SagaFailure, SagaId, SagaState, StepName, StepOutcome, TransactionId, Utc,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by [`ReservationCoordinator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The request itself is malformed
    #[error("Invalid reservation request: {0}")]
    InvalidRequest(String),

    /// A saga for this idempotency key is still running
    #[error("Saga {0} for this idempotency key is still in flight")]
    InFlight(SagaId),

    /// Storage fault; the saga outcome is unknown to the caller
    #[error(transparent)]
    Store(#[from] StoreError),

    /// State machine violation
    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// Input of [`ReservationCoordinator::reserve_and_confirm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Resource to reserve
    pub resource_id: ResourceId,
    /// Units to reserve
    pub units: u32,
    /// Payment instrument to charge
    pub payment_method: PaymentMethod,
    /// Caller-chosen key; retries with the same key never run the saga twice
    pub idempotency_key: IdempotencyKey,
}

/// Dependencies of the coordinator.
#[derive(Clone)]
pub struct CoordinatorEnvironment {
    /// Time source for saga timestamps
    pub clock: Arc<dyn Clock>,
    /// Inventory ledger
    pub ledger: Arc<InventoryLedger>,
    /// Payment gateway
    pub payments: Arc<dyn PaymentPort>,
    /// Saga and outbox persistence
    pub sagas: Arc<dyn SagaStore>,
}

/// Saga orchestrator for seat reservations.
pub struct ReservationCoordinator {
    env: CoordinatorEnvironment,
    config: CoordinatorConfig,
}

impl ReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(env: CoordinatorEnvironment, config: CoordinatorConfig) -> Self {
        Self { env, config }
    }

    /// Reserve inventory, charge the customer and confirm, or compensate.
    ///
    /// Returns the terminal saga. Repeating a request whose saga already
    /// finished returns that saga unchanged without touching inventory or
    /// payment.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::InvalidRequest`] for zero units
    /// - [`CoordinatorError::InFlight`] if the key's saga is still running
    /// - [`CoordinatorError::Store`] if the saga store failed
    pub async fn reserve_and_confirm(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationSaga, CoordinatorError> {
        if request.units == 0 {
            return Err(CoordinatorError::InvalidRequest(
                "units must be positive".to_string(),
            ));
        }

        let now = self.env.clock.now();
        let deadline = chrono::Duration::from_std(self.config.saga_deadline)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let saga = ReservationSaga::new(
            SagaId::new(),
            request.idempotency_key.clone(),
            request.resource_id.clone(),
            request.units,
            now,
            deadline,
        );

        match self
            .env
            .sagas
            .claim(request.idempotency_key.clone(), saga.clone())
            .await?
        {
            Claim::Existing(existing) if existing.is_terminal() => {
                SagaMetrics::record_replayed();
                tracing::info!(
                    saga_id = %existing.saga_id,
                    idempotency_key = %request.idempotency_key,
                    state = %existing.state,
                    "Returning terminal saga for repeated request"
                );
                return Ok(existing);
            }
            Claim::Existing(existing) => {
                return Err(CoordinatorError::InFlight(existing.saga_id));
            }
            Claim::Fresh => {}
        }

        SagaMetrics::record_started();
        tracing::info!(
            saga_id = %saga.saga_id,
            resource_id = %saga.resource_id,
            units = saga.requested_units,
            "Saga started"
        );

        self.run(saga, &request.payment_method).await
    }

    /// Load a saga by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] on storage faults.
    pub async fn saga_status(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<ReservationSaga>, CoordinatorError> {
        Ok(self.env.sagas.get(saga_id).await?)
    }

    /// Sagas waiting for an operator, with the reason each was flagged.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] on storage faults.
    pub async fn needs_attention(&self) -> Result<Vec<(SagaId, String)>, CoordinatorError> {
        Ok(self.env.sagas.flagged().await?)
    }

    /// Flag every unfinished saga older than its deadline plus the grace
    /// period. Returns the sagas newly flagged by this sweep.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] on storage faults.
    pub async fn sweep_stuck(&self) -> Result<Vec<SagaId>, CoordinatorError> {
        let now = self.env.clock.now();
        let grace = chrono::Duration::from_std(self.config.stuck_grace)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let already: Vec<SagaId> = self
            .env
            .sagas
            .flagged()
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let mut flagged = Vec::new();
        for saga in self.env.sagas.in_flight().await? {
            let stuck_after = saga.deadline.checked_add_signed(grace).unwrap_or(saga.deadline);
            if now <= stuck_after || already.contains(&saga.saga_id) {
                continue;
            }
            let reason = format!("stuck in {} since {}", saga.state, saga.updated_at);
            tracing::warn!(
                saga_id = %saga.saga_id,
                resource_id = %saga.resource_id,
                state = %saga.state,
                "Saga exceeded its deadline and grace period"
            );
            self.env.sagas.flag(saga.saga_id, reason).await?;
            SagaMetrics::record_flagged();
            flagged.push(saga.saga_id);
        }
        Ok(flagged)
    }

    /// Degraded while any saga waits for an operator.
    pub async fn health(&self) -> HealthCheck {
        match self.env.sagas.flagged().await {
            Ok(flagged) if flagged.is_empty() => HealthCheck::healthy("coordinator"),
            Ok(flagged) => HealthCheck::degraded(
                "coordinator",
                format!("{} saga(s) need operator attention", flagged.len()),
            )
            .with_metadata("flagged", flagged.len().to_string()),
            Err(e) => HealthCheck::unhealthy("coordinator", e.to_string()),
        }
    }

    async fn run(
        &self,
        mut saga: ReservationSaga,
        method: &PaymentMethod,
    ) -> Result<ReservationSaga, CoordinatorError> {
        let started = Instant::now();

        // Reserve
        self.advance(&mut saga, SagaState::Reserving)?;
        saga.record_step(
            StepName::ReserveInventory,
            StepOutcome::Started,
            None,
            None,
            self.env.clock.now(),
        )?;
        self.checkpoint(&saga).await;

        let hold = match self
            .env
            .ledger
            .reserve(&saga.resource_id, saga.requested_units)
            .await
        {
            Ok(hold) => hold,
            Err(e) => {
                saga.record_step(
                    StepName::ReserveInventory,
                    StepOutcome::Failed,
                    None,
                    Some(e.to_string()),
                    self.env.clock.now(),
                )?;
                return self.compensate(saga, inventory_failure(e), started).await;
            }
        };
        saga.amount = Some(hold.amount);
        saga.record_step(
            StepName::ReserveInventory,
            StepOutcome::Completed,
            Some(CompensationData::Hold(hold.clone())),
            None,
            self.env.clock.now(),
        )?;

        if self.remaining(&saga).is_zero() {
            return self
                .compensate(saga, SagaFailure::DeadlineExceeded, started)
                .await;
        }

        // Charge
        self.advance(&mut saga, SagaState::Charging)?;
        saga.record_step(
            StepName::ChargePayment,
            StepOutcome::Started,
            None,
            None,
            self.env.clock.now(),
        )?;
        self.checkpoint(&saga).await;

        let transaction_id = match self.charge(&saga, method, &hold).await {
            Ok(tx) => tx,
            Err(failure) => {
                saga.record_step(
                    StepName::ChargePayment,
                    StepOutcome::Failed,
                    None,
                    Some(failure.to_string()),
                    self.env.clock.now(),
                )?;
                return self.compensate(saga, failure, started).await;
            }
        };
        saga.record_step(
            StepName::ChargePayment,
            StepOutcome::Completed,
            Some(CompensationData::Payment(transaction_id.clone())),
            None,
            self.env.clock.now(),
        )?;

        if self.remaining(&saga).is_zero() {
            return self
                .compensate(saga, SagaFailure::DeadlineExceeded, started)
                .await;
        }

        // Finalize
        self.advance(&mut saga, SagaState::Finalizing)?;
        saga.record_step(
            StepName::Finalize,
            StepOutcome::Started,
            None,
            None,
            self.env.clock.now(),
        )?;

        let mut confirmed = saga.clone();
        let at = self.env.clock.now();
        confirmed.record_step(StepName::Finalize, StepOutcome::Completed, None, None, at)?;
        confirmed.transition(SagaState::Completed, at)?;
        let event = ReservationEvent::ReservationConfirmed {
            saga_id: saga.saga_id,
            resource_id: saga.resource_id.clone(),
            units: hold.units,
            amount: hold.amount,
            transaction_id,
        };

        match self.commit(confirmed.clone(), &event).await {
            Ok(()) => {
                SagaMetrics::record_completed(started.elapsed());
                tracing::info!(
                    saga_id = %confirmed.saga_id,
                    resource_id = %confirmed.resource_id,
                    state = %confirmed.state,
                    "Reservation confirmed"
                );
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!(
                    saga_id = %saga.saga_id,
                    error = %e,
                    "Confirmation could not be committed, compensating"
                );
                saga.record_step(
                    StepName::Finalize,
                    StepOutcome::Failed,
                    None,
                    Some(e.to_string()),
                    self.env.clock.now(),
                )?;
                self.compensate(saga, SagaFailure::OutboxUnavailable(e.to_string()), started)
                    .await
            }
        }
    }

    async fn charge(
        &self,
        saga: &ReservationSaga,
        method: &PaymentMethod,
        hold: &HoldToken,
    ) -> Result<TransactionId, SagaFailure> {
        let remaining = self.remaining(saga);
        let limit = remaining.min(self.config.payment_timeout);
        let bounded_by_deadline = remaining <= self.config.payment_timeout;

        let call = self
            .env
            .payments
            .charge(method.clone(), hold.amount, saga.saga_id);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(tx)) => Ok(tx),
            Ok(Err(e)) => Err(payment_failure(e)),
            Err(_) if bounded_by_deadline => Err(SagaFailure::DeadlineExceeded),
            Err(_) => {
                tracing::warn!(
                    saga_id = %saga.saga_id,
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "Payment gateway call timed out"
                );
                Err(payment_failure(PaymentError::GatewayTimeout))
            }
        }
    }

    /// Time left before `saga.deadline` on the injected clock.
    fn remaining(&self, saga: &ReservationSaga) -> Duration {
        (saga.deadline - self.env.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    async fn compensate(
        &self,
        mut saga: ReservationSaga,
        failure: SagaFailure,
        started: Instant,
    ) -> Result<ReservationSaga, CoordinatorError> {
        tracing::info!(
            saga_id = %saga.saga_id,
            resource_id = %saga.resource_id,
            failure = %failure,
            "Compensating saga"
        );
        saga.failure = Some(failure.clone());
        self.advance(&mut saga, SagaState::Compensating)?;
        self.checkpoint(&saga).await;

        for (step, data) in saga.compensation_plan() {
            let outcome = match data {
                Some(CompensationData::Hold(token)) => self.release(&token).await,
                Some(CompensationData::Payment(tx)) => self.refund(&tx).await,
                None => Ok(()),
            };
            let at = self.env.clock.now();
            match outcome {
                Ok(()) => {
                    saga.record_step(step, StepOutcome::Compensated, None, None, at)?;
                }
                Err(detail) => {
                    tracing::error!(
                        saga_id = %saga.saga_id,
                        step = %step,
                        error = %detail,
                        "Compensation failed"
                    );
                    saga.record_step(step, StepOutcome::CompensationFailed, None, Some(detail), at)?;
                }
            }
        }

        let failed_steps = saga.failed_compensations();
        let at = self.env.clock.now();
        let event = if failed_steps.is_empty() {
            saga.transition(SagaState::Compensated, at)?;
            ReservationEvent::ReservationCompensated {
                saga_id: saga.saga_id,
                resource_id: saga.resource_id.clone(),
                reason: failure.to_string(),
            }
        } else {
            saga.transition(SagaState::CompensationFailed, at)?;
            ReservationEvent::CompensationFailed {
                saga_id: saga.saga_id,
                resource_id: saga.resource_id.clone(),
                steps: failed_steps.clone(),
            }
        };
        self.commit(saga.clone(), &event).await?;

        if failed_steps.is_empty() {
            SagaMetrics::record_compensated(started.elapsed());
            tracing::info!(
                saga_id = %saga.saga_id,
                resource_id = %saga.resource_id,
                state = %saga.state,
                "Saga compensated"
            );
        } else {
            SagaMetrics::record_compensation_failed();
            let reason = format!("compensation failed for {failed_steps:?}");
            tracing::error!(
                saga_id = %saga.saga_id,
                resource_id = %saga.resource_id,
                state = %saga.state,
                steps = ?failed_steps,
                "Saga needs operator attention"
            );
            match self.env.sagas.flag(saga.saga_id, reason).await {
                Ok(()) => SagaMetrics::record_flagged(),
                Err(e) => tracing::error!(
                    saga_id = %saga.saga_id,
                    error = %e,
                    "Could not flag saga; it remains visible as COMPENSATION_FAILED"
                ),
            }
        }
        Ok(saga)
    }

    async fn release(&self, token: &HoldToken) -> Result<(), String> {
        retry_with_predicate(
            &self.config.compensation_retry,
            "release_hold",
            || self.env.ledger.release(token),
            |e: &InventoryError| {
                matches!(e, InventoryError::Contention { .. } | InventoryError::Store(_))
            },
        )
        .await
        .map_err(|e| e.to_string())
    }

    async fn refund(&self, transaction_id: &TransactionId) -> Result<(), String> {
        retry_with_predicate(
            &self.config.compensation_retry,
            "refund_payment",
            || {
                let call = self.env.payments.refund(transaction_id.clone());
                async move {
                    match tokio::time::timeout(self.config.payment_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(PaymentError::GatewayTimeout),
                    }
                }
            },
            PaymentError::is_transient,
        )
        .await
        .map_err(|e| e.to_string())
    }

    async fn commit(
        &self,
        saga: ReservationSaga,
        event: &ReservationEvent,
    ) -> Result<(), StoreError> {
        let message =
            OutboxMessage::from_event(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.env.sagas.commit(saga, vec![message]).await.map(|_| ())
    }

    // Intermediate progress is best effort; the terminal commit is not.
    async fn checkpoint(&self, saga: &ReservationSaga) {
        if let Err(e) = self.env.sagas.save(saga.clone()).await {
            tracing::warn!(
                saga_id = %saga.saga_id,
                state = %saga.state,
                error = %e,
                "Could not checkpoint saga progress"
            );
        }
    }

    fn advance(&self, saga: &mut ReservationSaga, next: SagaState) -> Result<(), SagaError> {
        saga.transition(next, self.env.clock.now())?;
        tracing::debug!(
            saga_id = %saga.saga_id,
            resource_id = %saga.resource_id,
            state = %saga.state,
            "Saga transition"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ReservationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn inventory_failure(error: InventoryError) -> SagaFailure {
    match error {
        InventoryError::ResourceNotFound(_) => SagaFailure::ResourceNotFound,
        InventoryError::InsufficientCapacity {
            requested,
            available,
        } => SagaFailure::InsufficientCapacity {
            requested,
            available,
        },
        InventoryError::Contention { .. } => SagaFailure::Contention,
        other => SagaFailure::InventoryUnavailable(other.to_string()),
    }
}

fn payment_failure(error: PaymentError) -> SagaFailure {
    match error {
        PaymentError::Declined(reason) => SagaFailure::PaymentDeclined(reason),
        PaymentError::GatewayTimeout => SagaFailure::PaymentTimeout,
        PaymentError::GatewayUnavailable(e) => SagaFailure::PaymentUnavailable(e),
    }
}
