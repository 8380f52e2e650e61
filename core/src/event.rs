//! Domain events emitted by the reservation coordinator.
//!
//! Events are written to the outbox as `bincode` bytes together with a
//! versioned type name, and decoded by consumers with [`Event::from_bytes`].
//!
//! # Example
//!
//! ```
//! use seatflow_core::event::{Event, ReservationEvent};
//! use seatflow_core::types::{Money, ResourceId, SagaId, TransactionId};
//!
//! let event = ReservationEvent::ReservationConfirmed {
//!     saga_id: SagaId::new(),
//!     resource_id: ResourceId::new("concert-1"),
//!     units: 2,
//!     amount: Money::from_cents(9_000),
//!     transaction_id: TransactionId::new("tx-1"),
//! };
//!
//! let bytes = event.to_bytes().unwrap();
//! assert_eq!(ReservationEvent::from_bytes(&bytes).unwrap(), event);
//! assert_eq!(event.event_type(), "ReservationConfirmed.v1");
//! ```

use crate::saga::StepName;
use crate::types::{Money, ResourceId, SagaId, TransactionId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error types for event encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// An event that can be stored in the outbox.
///
/// `event_type()` must be stable and carry a version suffix
/// (`"ReservationConfirmed.v1"`) so consumers can route payloads.
pub trait Event: Send + Sync + 'static {
    /// Versioned event type identifier.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// belong to another event schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Facts the coordinator publishes about reservations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    /// Inventory held, payment captured, reservation confirmed
    ReservationConfirmed {
        /// Saga that confirmed the reservation
        saga_id: SagaId,
        /// Resource reserved
        resource_id: ResourceId,
        /// Units reserved
        units: u32,
        /// Amount charged
        amount: Money,
        /// Gateway charge
        transaction_id: TransactionId,
    },
    /// The saga failed and every completed step was undone
    ReservationCompensated {
        /// Saga concerned
        saga_id: SagaId,
        /// Resource concerned
        resource_id: ResourceId,
        /// Failure that triggered compensation
        reason: String,
    },
    /// The saga failed and at least one step could not be undone
    CompensationFailed {
        /// Saga concerned
        saga_id: SagaId,
        /// Resource concerned
        resource_id: ResourceId,
        /// Steps left uncompensated
        steps: Vec<StepName>,
    },
}

impl ReservationEvent {
    /// Saga the event belongs to.
    #[must_use]
    pub const fn saga_id(&self) -> SagaId {
        match self {
            Self::ReservationConfirmed { saga_id, .. }
            | Self::ReservationCompensated { saga_id, .. }
            | Self::CompensationFailed { saga_id, .. } => *saga_id,
        }
    }

    /// Resource the event is about; also its outbox partition.
    #[must_use]
    pub const fn resource_id(&self) -> &ResourceId {
        match self {
            Self::ReservationConfirmed { resource_id, .. }
            | Self::ReservationCompensated { resource_id, .. }
            | Self::CompensationFailed { resource_id, .. } => resource_id,
        }
    }
}

impl Event for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ReservationConfirmed { .. } => "ReservationConfirmed.v1",
            Self::ReservationCompensated { .. } => "ReservationCompensated.v1",
            Self::CompensationFailed { .. } => "CompensationFailed.v1",
        }
    }
}
