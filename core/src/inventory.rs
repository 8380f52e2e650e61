//! Inventory records, hold tokens and the inventory error taxonomy.
//!
//! An [`InventoryRecord`] is mutated only through version-checked updates
//! ([`InventoryUpdate`]). Every successful update bumps `version` by one, so
//! the sequence of versions is a total order of all mutations of a resource.

use crate::types::{HoldId, Money, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Total and available capacity of one bookable resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Resource this record describes
    pub resource_id: ResourceId,
    /// Capacity registered for the resource
    pub total_capacity: u32,
    /// Units not currently held (`0 <= available_capacity <= total_capacity`)
    pub available_capacity: u32,
    /// Optimistic concurrency version, incremented on every mutation
    pub version: u64,
    /// Price of a single unit
    pub unit_price: Money,
}

impl InventoryRecord {
    /// A freshly registered resource with all capacity available.
    #[must_use]
    pub const fn new(resource_id: ResourceId, total_capacity: u32, unit_price: Money) -> Self {
        Self {
            resource_id,
            total_capacity,
            available_capacity: total_capacity,
            version: 0,
            unit_price,
        }
    }

    /// Units currently held by reservations.
    #[must_use]
    pub const fn held(&self) -> u32 {
        self.total_capacity - self.available_capacity
    }
}

/// Capability returned by a successful reservation.
///
/// Releasing a hold requires the token; the `hold_id` is the per-token
/// consumed flag that makes release idempotent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldToken {
    /// Compensation handle for this hold
    pub hold_id: HoldId,
    /// Resource the units were taken from
    pub resource_id: ResourceId,
    /// Units held
    pub units: u32,
    /// Price of the held units, fixed at reservation time
    pub amount: Money,
    /// When the hold was taken
    pub reserved_at: DateTime<Utc>,
}

/// Hold bookkeeping applied in the same atomic unit as a capacity change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HoldChange {
    /// Record a newly opened hold
    Open(HoldToken),
    /// Mark an existing hold as consumed (released)
    Consume(HoldId),
}

/// A version-checked mutation of one inventory record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryUpdate {
    /// Record to update
    pub resource_id: ResourceId,
    /// Version the caller read; the update fails if the record has moved on
    pub expected_version: u64,
    /// New available capacity
    pub available_capacity: u32,
    /// Hold bookkeeping committed together with the capacity change
    pub hold: HoldChange,
}

/// Result of applying an [`InventoryUpdate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Update committed; carries the record as written
    Applied(InventoryRecord),
    /// Record version did not match `expected_version`
    VersionConflict {
        /// Version found in the store
        actual: u64,
    },
    /// `HoldChange::Consume` targeted a hold that was already consumed
    HoldAlreadyConsumed,
}

/// Errors from inventory ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The resource was never registered
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// Not enough available capacity for the request
    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Units requested
        requested: u32,
        /// Units available when the request was evaluated
        available: u32,
    },

    /// Optimistic concurrency retries were exhausted
    #[error("Contention on {resource_id} after {attempts} attempts")]
    Contention {
        /// Resource under contention
        resource_id: ResourceId,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// A hold token that the ledger never issued
    #[error("Unknown hold: {0}")]
    UnknownHold(HoldId),

    /// Invalid argument (zero units, duplicate registration)
    #[error("Invalid inventory request: {0}")]
    Invalid(String),

    /// The backing store failed
    #[error("Inventory store unavailable: {0}")]
    Store(String),
}

impl InventoryError {
    /// Whether the error is an expected business outcome rather than a fault.
    #[must_use]
    pub const fn is_business_outcome(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotFound(_) | Self::InsufficientCapacity { .. } | Self::Contention { .. }
        )
    }
}
