//! Inventory ledger.
//!
//! Reserve and release are compare-and-swap loops against the record
//! version. A conflicting writer never blocks: the loser re-reads, re-checks
//! capacity and tries again after a short randomized pause, up to
//! [`LedgerConfig::max_attempts`] times.

use crate::config::LedgerConfig;
use crate::metrics::LedgerMetrics;
use rand::Rng;
use seatflow_core::environment::Clock;
use seatflow_core::inventory::{ApplyOutcome, HoldChange, InventoryUpdate};
use seatflow_core::store::{InventoryStore, StoreError};
use seatflow_core::{HoldId, HoldToken, InventoryError, InventoryRecord, Money, ResourceId};
use std::sync::Arc;
use std::time::Duration;

/// Capacity ledger over an [`InventoryStore`].
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl InventoryLedger {
    /// Create a ledger.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Register a resource with all of its capacity available.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Invalid`] if the resource is already registered,
    /// [`InventoryError::Store`] on storage faults.
    pub async fn register(
        &self,
        resource_id: ResourceId,
        total_capacity: u32,
        unit_price: Money,
    ) -> Result<InventoryRecord, InventoryError> {
        let record = InventoryRecord::new(resource_id, total_capacity, unit_price);
        self.store
            .insert(record.clone())
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) => InventoryError::Invalid(msg),
                other => InventoryError::Store(other.to_string()),
            })?;
        tracing::info!(
            resource_id = %record.resource_id,
            total_capacity,
            "Resource registered"
        );
        Ok(record)
    }

    /// Current record of a resource.
    ///
    /// # Errors
    ///
    /// [`InventoryError::ResourceNotFound`] or [`InventoryError::Store`].
    pub async fn snapshot(&self, resource_id: &ResourceId) -> Result<InventoryRecord, InventoryError> {
        self.load(resource_id).await
    }

    /// Take `units` out of the available capacity of `resource_id`.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Invalid`] for zero units
    /// - [`InventoryError::ResourceNotFound`] for an unregistered resource
    /// - [`InventoryError::InsufficientCapacity`] when too few units are left
    /// - [`InventoryError::Contention`] when every attempt lost its race
    /// - [`InventoryError::Store`] on storage faults
    pub async fn reserve(
        &self,
        resource_id: &ResourceId,
        units: u32,
    ) -> Result<HoldToken, InventoryError> {
        if units == 0 {
            return Err(InventoryError::Invalid("units must be positive".to_string()));
        }

        for attempt in 1..=self.config.max_attempts {
            let record = self.load(resource_id).await?;
            if record.available_capacity < units {
                LedgerMetrics::record_insufficient();
                return Err(InventoryError::InsufficientCapacity {
                    requested: units,
                    available: record.available_capacity,
                });
            }

            let amount = record.unit_price.checked_mul(units).ok_or_else(|| {
                InventoryError::Invalid(format!("price of {units} units overflows"))
            })?;
            let token = HoldToken {
                hold_id: HoldId::new(),
                resource_id: resource_id.clone(),
                units,
                amount,
                reserved_at: self.clock.now(),
            };
            let update = InventoryUpdate {
                resource_id: resource_id.clone(),
                expected_version: record.version,
                available_capacity: record.available_capacity - units,
                hold: HoldChange::Open(token.clone()),
            };

            match self.apply(update).await? {
                ApplyOutcome::Applied(written) => {
                    LedgerMetrics::record_reserved();
                    tracing::debug!(
                        resource_id = %resource_id,
                        hold_id = %token.hold_id,
                        units,
                        available = written.available_capacity,
                        version = written.version,
                        attempt,
                        "Hold granted"
                    );
                    return Ok(token);
                }
                ApplyOutcome::VersionConflict { actual } => {
                    LedgerMetrics::record_conflict();
                    tracing::trace!(
                        resource_id = %resource_id,
                        expected = record.version,
                        actual,
                        attempt,
                        "Version conflict on reserve"
                    );
                    self.pause(attempt).await;
                }
                ApplyOutcome::HoldAlreadyConsumed => {
                    return Err(InventoryError::Store(
                        "store reported a consumed hold for a new hold".to_string(),
                    ));
                }
            }
        }

        LedgerMetrics::record_contention();
        tracing::warn!(
            resource_id = %resource_id,
            attempts = self.config.max_attempts,
            "Reserve gave up under contention"
        );
        Err(InventoryError::Contention {
            resource_id: resource_id.clone(),
            attempts: self.config.max_attempts,
        })
    }

    /// Return the units of `token` to the available capacity.
    ///
    /// Releasing a hold that was already released is a no-op. Capacity never
    /// exceeds the total: an over-release is clamped and logged.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::UnknownHold`] for a token this ledger never issued
    /// - [`InventoryError::ResourceNotFound`] for an unregistered resource
    /// - [`InventoryError::Contention`] when every attempt lost its race
    /// - [`InventoryError::Store`] on storage faults
    pub async fn release(&self, token: &HoldToken) -> Result<(), InventoryError> {
        let resource_id = &token.resource_id;

        for attempt in 1..=self.config.max_attempts {
            let (stored, consumed) = self
                .store
                .hold(resource_id, token.hold_id)
                .await
                .map_err(|e| InventoryError::Store(e.to_string()))?
                .ok_or(InventoryError::UnknownHold(token.hold_id))?;
            if consumed {
                tracing::debug!(hold_id = %token.hold_id, "Hold already released");
                return Ok(());
            }

            let record = self.load(resource_id).await?;
            let restored = record.available_capacity.saturating_add(stored.units);
            let clamped = restored > record.total_capacity;
            if clamped {
                tracing::error!(
                    resource_id = %resource_id,
                    hold_id = %token.hold_id,
                    units = stored.units,
                    available = record.available_capacity,
                    total = record.total_capacity,
                    "Release would exceed total capacity, clamping"
                );
            }

            let update = InventoryUpdate {
                resource_id: resource_id.clone(),
                expected_version: record.version,
                available_capacity: restored.min(record.total_capacity),
                hold: HoldChange::Consume(token.hold_id),
            };

            match self.apply(update).await? {
                ApplyOutcome::Applied(written) => {
                    LedgerMetrics::record_released(clamped);
                    tracing::debug!(
                        resource_id = %resource_id,
                        hold_id = %token.hold_id,
                        available = written.available_capacity,
                        version = written.version,
                        "Hold released"
                    );
                    return Ok(());
                }
                ApplyOutcome::HoldAlreadyConsumed => return Ok(()),
                ApplyOutcome::VersionConflict { .. } => {
                    LedgerMetrics::record_conflict();
                    self.pause(attempt).await;
                }
            }
        }

        tracing::warn!(
            resource_id = %resource_id,
            hold_id = %token.hold_id,
            attempts = self.config.max_attempts,
            "Release gave up under contention"
        );
        Err(InventoryError::Contention {
            resource_id: resource_id.clone(),
            attempts: self.config.max_attempts,
        })
    }

    async fn load(&self, resource_id: &ResourceId) -> Result<InventoryRecord, InventoryError> {
        self.store
            .load(resource_id)
            .await
            .map_err(|e| InventoryError::Store(e.to_string()))?
            .ok_or_else(|| InventoryError::ResourceNotFound(resource_id.clone()))
    }

    async fn apply(&self, update: InventoryUpdate) -> Result<ApplyOutcome, InventoryError> {
        let resource_id = update.resource_id.clone();
        self.store.apply(update).await.map_err(|e| match e {
            StoreError::NotFound(_) => InventoryError::ResourceNotFound(resource_id),
            other => InventoryError::Store(other.to_string()),
        })
    }

    // Full jitter, growing linearly with the attempt number.
    async fn pause(&self, attempt: u32) {
        let base = self.config.contention_backoff.saturating_mul(attempt);
        if base.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let delay = {
            let nanos = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
            Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
        };
        tokio::time::sleep(delay).await;
    }
}

impl std::fmt::Debug for InventoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::memory::InMemoryInventoryStore;
    use seatflow_core::SystemClock;
    use seatflow_testing::{FaultyInventoryStore, test_clock};

    fn ledger_with(store: Arc<dyn InventoryStore>, max_attempts: u32) -> InventoryLedger {
        InventoryLedger::new(
            store,
            test_clock(),
            LedgerConfig::default()
                .with_max_attempts(max_attempts)
                .with_contention_backoff(Duration::ZERO),
        )
    }

    async fn ledger(total: u32) -> InventoryLedger {
        let ledger = ledger_with(Arc::new(InMemoryInventoryStore::new()), 32);
        ledger
            .register(ResourceId::new("concert"), total, Money::from_cents(4_550))
            .await
            .unwrap();
        ledger
    }

    fn concert() -> ResourceId {
        ResourceId::new("concert")
    }

    #[tokio::test]
    async fn reserve_takes_capacity_and_prices_the_hold() {
        let ledger = ledger(10).await;
        let token = ledger.reserve(&concert(), 3).await.unwrap();

        assert_eq!(token.units, 3);
        assert_eq!(token.amount, Money::from_cents(13_650));
        let record = ledger.snapshot(&concert()).await.unwrap();
        assert_eq!(record.available_capacity, 7);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn reserve_rejects_zero_units() {
        let ledger = ledger(10).await;
        assert!(matches!(
            ledger.reserve(&concert(), 0).await,
            Err(InventoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn reserve_reports_missing_resource() {
        let ledger = ledger(10).await;
        assert_eq!(
            ledger.reserve(&ResourceId::new("nope"), 1).await,
            Err(InventoryError::ResourceNotFound(ResourceId::new("nope")))
        );
    }

    #[tokio::test]
    async fn reserve_beyond_capacity_leaves_record_untouched() {
        let ledger = ledger(2).await;
        assert_eq!(
            ledger.reserve(&concert(), 3).await,
            Err(InventoryError::InsufficientCapacity {
                requested: 3,
                available: 2
            })
        );
        let record = ledger.snapshot(&concert()).await.unwrap();
        assert_eq!(record.available_capacity, 2);
        assert_eq!(record.version, 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let ledger = ledger(5).await;
        let token = ledger.reserve(&concert(), 2).await.unwrap();

        ledger.release(&token).await.unwrap();
        ledger.release(&token).await.unwrap();

        let record = ledger.snapshot(&concert()).await.unwrap();
        assert_eq!(record.available_capacity, 5);
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn release_of_unknown_hold_is_rejected() {
        let ledger = ledger(5).await;
        let forged = HoldToken {
            hold_id: HoldId::new(),
            resource_id: concert(),
            units: 1,
            amount: Money::ZERO,
            reserved_at: SystemClock.now(),
        };
        assert_eq!(
            ledger.release(&forged).await,
            Err(InventoryError::UnknownHold(forged.hold_id))
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_invalid() {
        let ledger = ledger(5).await;
        assert!(matches!(
            ledger.register(concert(), 5, Money::ZERO).await,
            Err(InventoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn store_faults_surface_as_store_errors() {
        let store = Arc::new(FaultyInventoryStore::new(InMemoryInventoryStore::new()));
        let ledger = ledger_with(Arc::clone(&store) as Arc<dyn InventoryStore>, 4);
        ledger.register(concert(), 5, Money::ZERO).await.unwrap();

        store.fail_all(true);
        assert!(matches!(
            ledger.reserve(&concert(), 1).await,
            Err(InventoryError::Store(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_oversell() {
        let ledger = Arc::new(ledger(10).await);
        let handles: Vec<_> = (0..15)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.reserve(&concert(), 1).await })
            })
            .collect();

        let mut granted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(InventoryError::InsufficientCapacity { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(refused, 5);
        let record = ledger.snapshot(&concert()).await.unwrap();
        assert_eq!(record.available_capacity, 0);
        assert_eq!(record.version, 10);
    }
}
