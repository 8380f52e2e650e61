//! Reservation saga record and its state machine.
//!
//! ```text
//! STARTED ─► RESERVING ─► CHARGING ─► FINALIZING ─► COMPLETED
//!    │           │            │            │
//!    └───────────┴─────┬──────┴────────────┘
//!                      ▼
//!                COMPENSATING ─► COMPENSATED
//!                      │
//!                      └───────► COMPENSATION_FAILED
//! ```
//!
//! The step log is append-only. Forward steps append `STARTED` followed by
//! `COMPLETED` or `FAILED`; compensation appends one `COMPENSATED` or
//! `COMPENSATION_FAILED` record per completed step, newest step first.

use crate::inventory::HoldToken;
use crate::types::{IdempotencyKey, Money, ResourceId, SagaId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a reservation saga.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Record created, no step run yet
    Started,
    /// Holding inventory
    Reserving,
    /// Charging the customer
    Charging,
    /// Writing the confirmation and its outbox event
    Finalizing,
    /// Reservation confirmed (terminal)
    Completed,
    /// Undoing completed steps
    Compensating,
    /// Every completed step was undone (terminal)
    Compensated,
    /// At least one compensation did not complete (terminal, needs an operator)
    CompensationFailed,
}

impl SagaState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Compensated | Self::CompensationFailed
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::Reserving)
                | (Self::Reserving, Self::Charging)
                | (Self::Charging, Self::Finalizing)
                | (Self::Finalizing, Self::Completed)
                | (
                    Self::Started | Self::Reserving | Self::Charging | Self::Finalizing,
                    Self::Compensating
                )
                | (
                    Self::Compensating,
                    Self::Compensated | Self::CompensationFailed
                )
        )
    }

    /// Stable upper-case name, as used in logs and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Reserving => "RESERVING",
            Self::Charging => "CHARGING",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward steps of the reservation saga, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    /// Hold capacity in the inventory ledger
    ReserveInventory,
    /// Charge the payment method
    ChargePayment,
    /// Confirm and append the outbox event
    Finalize,
}

impl StepName {
    /// Stable upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReserveInventory => "RESERVE_INVENTORY",
            Self::ChargePayment => "CHARGE_PAYMENT",
            Self::Finalize => "FINALIZE",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    /// Step began
    Started,
    /// Step succeeded
    Completed,
    /// Step failed
    Failed,
    /// Step was undone
    Compensated,
    /// Undoing the step failed after retries
    CompensationFailed,
}

/// Data required to reverse a completed step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationData {
    /// Inventory hold to release
    Hold(HoldToken),
    /// Charge to refund
    Payment(TransactionId),
}

/// One entry of the append-only step log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step this record is about
    pub name: StepName,
    /// What happened
    pub outcome: StepOutcome,
    /// Reversal handle, present on `COMPLETED` records of reversible steps
    pub compensation_data: Option<CompensationData>,
    /// Optional diagnostic (failure reason, compensation error)
    pub detail: Option<String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Why a saga left the success path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaFailure {
    /// The resource is not registered
    ResourceNotFound,
    /// Not enough capacity
    InsufficientCapacity {
        /// Units requested
        requested: u32,
        /// Units available
        available: u32,
    },
    /// Inventory retries exhausted under contention
    Contention,
    /// Inventory store fault while reserving
    InventoryUnavailable(String),
    /// The payment was declined
    PaymentDeclined(String),
    /// The payment gateway did not answer in time
    PaymentTimeout,
    /// The payment gateway could not be reached
    PaymentUnavailable(String),
    /// The saga deadline elapsed before the reservation was confirmed
    DeadlineExceeded,
    /// The confirmation could not be written together with its outbox event
    OutboxUnavailable(String),
}

impl fmt::Display for SagaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceNotFound => write!(f, "resource not found"),
            Self::InsufficientCapacity {
                requested,
                available,
            } => write!(
                f,
                "insufficient capacity (requested {requested}, available {available})"
            ),
            Self::Contention => write!(f, "inventory contention"),
            Self::InventoryUnavailable(e) => write!(f, "inventory unavailable: {e}"),
            Self::PaymentDeclined(reason) => write!(f, "payment declined: {reason}"),
            Self::PaymentTimeout => write!(f, "payment gateway timeout"),
            Self::PaymentUnavailable(e) => write!(f, "payment gateway unavailable: {e}"),
            Self::DeadlineExceeded => write!(f, "saga deadline exceeded"),
            Self::OutboxUnavailable(e) => write!(f, "outbox unavailable: {e}"),
        }
    }
}

/// Saga state-machine and compensation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SagaError {
    /// The saga already reached a terminal state
    #[error("Saga {saga_id} is already terminal ({state})")]
    AlreadyTerminal {
        /// Saga concerned
        saga_id: SagaId,
        /// Its terminal state
        state: SagaState,
    },

    /// The requested transition is not an edge of the state machine
    #[error("Saga {saga_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Saga concerned
        saga_id: SagaId,
        /// Current state
        from: SagaState,
        /// Requested state
        to: SagaState,
    },

    /// One or more compensations did not complete; an operator must intervene
    #[error("Saga {saga_id} failed to compensate {steps:?}")]
    CompensationFailed {
        /// Saga concerned
        saga_id: SagaId,
        /// Steps whose compensation failed
        steps: Vec<StepName>,
    },
}

/// One in-flight or completed reservation workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSaga {
    /// Unique saga identifier
    pub saga_id: SagaId,
    /// Caller key this saga was created for
    pub idempotency_key: IdempotencyKey,
    /// Resource being reserved
    pub resource_id: ResourceId,
    /// Units requested (positive)
    pub requested_units: u32,
    /// Amount charged or to be charged, known once inventory is held
    pub amount: Option<Money>,
    /// Current state
    pub state: SagaState,
    /// Append-only step log
    pub steps: Vec<StepRecord>,
    /// Why the saga compensated, if it did
    pub failure: Option<SagaFailure>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
    /// Confirmation must happen before this instant
    pub deadline: DateTime<Utc>,
    /// Time a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReservationSaga {
    /// Create a saga in `STARTED`.
    #[must_use]
    pub const fn new(
        saga_id: SagaId,
        idempotency_key: IdempotencyKey,
        resource_id: ResourceId,
        requested_units: u32,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id,
            idempotency_key,
            resource_id,
            requested_units,
            amount: None,
            state: SagaState::Started,
            steps: Vec::new(),
            failure: None,
            created_at,
            updated_at: created_at,
            deadline,
            completed_at: None,
        }
    }

    /// Whether the saga reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// - [`SagaError::AlreadyTerminal`] if the saga is terminal
    /// - [`SagaError::InvalidTransition`] if `next` is not reachable from the current state
    pub fn transition(&mut self, next: SagaState, at: DateTime<Utc>) -> Result<(), SagaError> {
        self.ensure_open()?;
        if !self.state.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                saga_id: self.saga_id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = at;
        if next.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }

    /// Append a record to the step log.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::AlreadyTerminal`] once the saga is terminal.
    pub fn record_step(
        &mut self,
        name: StepName,
        outcome: StepOutcome,
        compensation_data: Option<CompensationData>,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), SagaError> {
        self.ensure_open()?;
        self.steps.push(StepRecord {
            name,
            outcome,
            compensation_data,
            detail,
            timestamp: at,
        });
        self.updated_at = at;
        Ok(())
    }

    /// Completed forward steps, newest first, with their reversal data.
    ///
    /// This is the order compensation runs in.
    #[must_use]
    pub fn compensation_plan(&self) -> Vec<(StepName, Option<CompensationData>)> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.outcome == StepOutcome::Completed)
            .filter(|s| {
                !self.steps.iter().any(|c| {
                    c.name == s.name
                        && matches!(
                            c.outcome,
                            StepOutcome::Compensated | StepOutcome::CompensationFailed
                        )
                })
            })
            .map(|s| (s.name, s.compensation_data.clone()))
            .collect()
    }

    /// Steps whose compensation failed.
    #[must_use]
    pub fn failed_compensations(&self) -> Vec<StepName> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::CompensationFailed)
            .map(|s| s.name)
            .collect()
    }

    /// The inventory hold, if inventory was reserved.
    #[must_use]
    pub fn hold_token(&self) -> Option<&HoldToken> {
        self.steps.iter().find_map(|s| match &s.compensation_data {
            Some(CompensationData::Hold(token)) => Some(token),
            _ => None,
        })
    }

    /// The charge, if payment succeeded.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.steps.iter().find_map(|s| match &s.compensation_data {
            Some(CompensationData::Payment(tx)) => Some(tx),
            _ => None,
        })
    }

    /// Outcomes recorded for `name`, in order.
    #[must_use]
    pub fn outcomes_of(&self, name: StepName) -> Vec<StepOutcome> {
        self.steps
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.outcome)
            .collect()
    }

    /// The compensation error to surface to an operator, if any.
    #[must_use]
    pub fn compensation_error(&self) -> Option<SagaError> {
        (self.state == SagaState::CompensationFailed).then(|| SagaError::CompensationFailed {
            saga_id: self.saga_id,
            steps: self.failed_compensations(),
        })
    }

    fn ensure_open(&self) -> Result<(), SagaError> {
        if self.state.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                saga_id: self.saga_id,
                state: self.state,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::{HoldId, Money};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn saga() -> ReservationSaga {
        ReservationSaga::new(
            SagaId::new(),
            IdempotencyKey::new("k"),
            ResourceId::new("r"),
            2,
            at(0),
            at(900),
        )
    }

    fn token() -> HoldToken {
        HoldToken {
            hold_id: HoldId::new(),
            resource_id: ResourceId::new("r"),
            units: 2,
            amount: Money::from_cents(200),
            reserved_at: at(1),
        }
    }

    const ALL: [SagaState; 8] = [
        SagaState::Started,
        SagaState::Reserving,
        SagaState::Charging,
        SagaState::Finalizing,
        SagaState::Completed,
        SagaState::Compensating,
        SagaState::Compensated,
        SagaState::CompensationFailed,
    ];

    #[test]
    fn happy_path_reaches_completed() {
        let mut s = saga();
        for next in [
            SagaState::Reserving,
            SagaState::Charging,
            SagaState::Finalizing,
            SagaState::Completed,
        ] {
            s.transition(next, at(2)).unwrap();
        }
        assert!(s.is_terminal());
        assert_eq!(s.completed_at, Some(at(2)));
    }

    #[test]
    fn terminal_saga_rejects_mutation() {
        let mut s = saga();
        s.transition(SagaState::Compensating, at(1)).unwrap();
        s.transition(SagaState::Compensated, at(2)).unwrap();

        let err = s.transition(SagaState::Reserving, at(3)).unwrap_err();
        assert!(matches!(err, SagaError::AlreadyTerminal { .. }));
        let err = s
            .record_step(StepName::Finalize, StepOutcome::Started, None, None, at(3))
            .unwrap_err();
        assert!(matches!(err, SagaError::AlreadyTerminal { .. }));
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut s = saga();
        let err = s.transition(SagaState::Charging, at(1)).unwrap_err();
        assert_eq!(
            err,
            SagaError::InvalidTransition {
                saga_id: s.saga_id,
                from: SagaState::Started,
                to: SagaState::Charging,
            }
        );
    }

    #[test]
    fn compensation_plan_is_newest_first() {
        let mut s = saga();
        let hold = token();
        s.record_step(
            StepName::ReserveInventory,
            StepOutcome::Completed,
            Some(CompensationData::Hold(hold.clone())),
            None,
            at(1),
        )
        .unwrap();
        s.record_step(
            StepName::ChargePayment,
            StepOutcome::Completed,
            Some(CompensationData::Payment(TransactionId::new("tx-1"))),
            None,
            at(2),
        )
        .unwrap();
        s.record_step(StepName::Finalize, StepOutcome::Failed, None, None, at(3))
            .unwrap();

        let plan: Vec<StepName> = s.compensation_plan().into_iter().map(|(n, _)| n).collect();
        assert_eq!(plan, vec![StepName::ChargePayment, StepName::ReserveInventory]);
        assert_eq!(s.hold_token(), Some(&hold));
        assert_eq!(s.transaction_id().unwrap().as_str(), "tx-1");
    }

    #[test]
    fn compensated_steps_leave_the_plan() {
        let mut s = saga();
        s.record_step(
            StepName::ReserveInventory,
            StepOutcome::Completed,
            Some(CompensationData::Hold(token())),
            None,
            at(1),
        )
        .unwrap();
        s.record_step(
            StepName::ReserveInventory,
            StepOutcome::Compensated,
            None,
            None,
            at(2),
        )
        .unwrap();
        assert!(s.compensation_plan().is_empty());
    }

    #[test]
    fn states_serialize_with_upper_case_names() {
        let json = serde_json::to_string(&SagaState::CompensationFailed).unwrap();
        assert_eq!(json, "\"COMPENSATION_FAILED\"");
        assert_eq!(
            serde_json::to_string(&StepName::ReserveInventory).unwrap(),
            "\"RESERVE_INVENTORY\""
        );
    }

    proptest! {
        #[test]
        fn terminal_states_have_no_exits(from in 0usize..8, to in 0usize..8) {
            let (from, to) = (ALL[from], ALL[to]);
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn any_walk_ends_terminal_at_most_once(choices in proptest::collection::vec(0usize..8, 0..20)) {
            let mut s = saga();
            let mut terminal_hits = 0;
            for c in choices {
                let was_terminal = s.is_terminal();
                if s.transition(ALL[c], at(5)).is_ok() && !was_terminal && s.is_terminal() {
                    terminal_hits += 1;
                }
            }
            prop_assert!(terminal_hits <= 1);
        }
    }
}
