//! # Seatflow Core
//!
//! Domain types, error taxonomy and port traits for the seatflow seat-inventory
//! reservation coordinator.
//!
//! ## Components
//!
//! - **Inventory Ledger**: per-resource capacity counters mutated through
//!   version-checked updates ([`inventory`], [`store::InventoryStore`])
//! - **Reservation Coordinator**: a saga that reserves, charges and confirms,
//!   compensating in reverse order on failure ([`saga`])
//! - **Outbox Relay**: ordered, at-least-once publication of domain events
//!   written in the same atomic unit as the saga transition ([`outbox`])
//!
//! This crate performs no I/O. The runtime crate provides the ledger,
//! coordinator and relay; external systems plug in through [`ports`].

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Identifier and value types
pub mod types;

/// Inventory records, holds and inventory errors
pub mod inventory;

/// Reservation saga record and state machine
pub mod saga;

/// Domain events and their binary encoding
pub mod event;

/// Outbox entries
pub mod outbox;

/// Payment and publish ports
pub mod ports;

/// Storage traits
pub mod store;

/// Environment module - injected dependencies that are not domain ports.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seatflow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use event::{Event, EventError, ReservationEvent};
pub use inventory::{HoldToken, InventoryError, InventoryRecord};
pub use outbox::{OutboxEntry, OutboxMessage, PublishState};
pub use ports::{PaymentError, PaymentPort, PublishError, PublishPort};
pub use saga::{
    CompensationData, ReservationSaga, SagaError, SagaFailure, SagaState, StepName, StepOutcome,
    StepRecord,
};
pub use store::{Claim, InventoryStore, OutboxStore, SagaStore, StoreError};
pub use types::{
    EntryId, HoldId, IdempotencyKey, Money, PartitionKey, PaymentMethod, ResourceId, SagaId,
    TransactionId,
};
