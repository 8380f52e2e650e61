//! # Seatflow Runtime
//!
//! Runtime components for the seatflow reservation coordinator.
//!
//! - [`ledger::InventoryLedger`]: optimistic-concurrency reserve and release
//! - [`coordinator::ReservationCoordinator`]: the reservation saga
//! - [`relay::OutboxRelay`]: ordered, at-least-once outbox publication
//! - [`memory`]: in-memory stores implementing the core storage traits
//! - [`retry`], [`config`], [`metrics`], [`health`]: ambient plumbing
//!
//! # Example
//!
//! ```rust,no_run
//! use seatflow_core::{SystemClock, Money, ResourceId};
//! use seatflow_runtime::config::LedgerConfig;
//! use seatflow_runtime::ledger::InventoryLedger;
//! use seatflow_runtime::memory::InMemoryInventoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), seatflow_core::InventoryError> {
//! let ledger = InventoryLedger::new(
//!     Arc::new(InMemoryInventoryStore::new()),
//!     Arc::new(SystemClock),
//!     LedgerConfig::default(),
//! );
//! ledger.register(ResourceId::new("hall-a"), 500, Money::from_cents(4_500)).await?;
//! let hold = ledger.reserve(&ResourceId::new("hall-a"), 2).await?;
//! ledger.release(&hold).await?;
//! # Ok(())
//! # }
//! ```

/// Configuration loaded from the environment
pub mod config;

/// Reservation saga orchestration
pub mod coordinator;

/// Inventory ledger
pub mod ledger;

/// Component health reporting
pub mod health;

/// In-memory store implementations
pub mod memory;

/// Prometheus metrics
pub mod metrics;

/// Outbox relay
pub mod relay;

/// Retry policies and exponential backoff
pub mod retry;

pub use config::{Config, ConfigError, CoordinatorConfig, LedgerConfig, RelayConfig};
pub use coordinator::{
    CoordinatorEnvironment, CoordinatorError, ReservationCoordinator, ReservationRequest,
};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use ledger::InventoryLedger;
pub use memory::{InMemoryInventoryStore, InMemoryStore};
pub use relay::{DrainReport, OutboxRelay, RelayHandle};
pub use retry::RetryPolicy;
