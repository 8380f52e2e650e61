//! Storage abstractions behind the ledger, the coordinator and the relay.
//!
//! Any durable store that honors these contracts can back the runtime:
//!
//! - [`InventoryStore::apply`] is a compare-and-swap on the record version and
//!   commits the hold bookkeeping in the same atomic unit.
//! - [`SagaStore::commit`] persists a saga transition and its outbox messages
//!   atomically: either both are visible afterwards or neither is.
//! - [`OutboxStore::pending`] returns entries of one partition in `EntryId`
//!   order.

use crate::inventory::{ApplyOutcome, HoldToken, InventoryRecord, InventoryUpdate};
use crate::outbox::{OutboxEntry, OutboxMessage};
use crate::saga::ReservationSaga;
use crate::types::{EntryId, HoldId, IdempotencyKey, PartitionKey, ResourceId, SagaId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

/// System-level storage faults.
///
/// These are never business outcomes: a caller receiving one must treat the
/// operation's outcome as unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing store unreachable or refusing writes
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Write rejected because of a uniqueness or state conflict
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Versioned inventory records and hold flags.
pub trait InventoryStore: Send + Sync {
    /// Register a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the resource is already registered.
    fn insert(&self, record: InventoryRecord) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Load the current record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn load(
        &self,
        resource_id: &ResourceId,
    ) -> BoxFuture<'_, Result<Option<InventoryRecord>, StoreError>>;

    /// Look up a hold and whether it has been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn hold(
        &self,
        resource_id: &ResourceId,
        hold_id: HoldId,
    ) -> BoxFuture<'_, Result<Option<(HoldToken, bool)>, StoreError>>;

    /// Conditionally apply an update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist and
    /// [`StoreError::Unavailable`] on storage faults. Version conflicts are
    /// reported through [`ApplyOutcome`], not as errors.
    fn apply(&self, update: InventoryUpdate) -> BoxFuture<'_, Result<ApplyOutcome, StoreError>>;
}

/// Result of claiming an idempotency key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The key was free; the saga was stored
    Fresh,
    /// The key already belongs to this saga
    Existing(ReservationSaga),
}

/// Saga persistence and the operator attention list.
pub trait SagaStore: Send + Sync {
    /// Store `saga` under `key` unless the key is taken.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn claim(
        &self,
        key: IdempotencyKey,
        saga: ReservationSaga,
    ) -> BoxFuture<'_, Result<Claim, StoreError>>;

    /// Persist in-flight progress.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unclaimed saga.
    fn save(&self, saga: ReservationSaga) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Persist `saga` and append `messages` to the outbox as one atomic unit.
    ///
    /// # Errors
    ///
    /// On any error nothing was written.
    fn commit(
        &self,
        saga: ReservationSaga,
        messages: Vec<OutboxMessage>,
    ) -> BoxFuture<'_, Result<Vec<EntryId>, StoreError>>;

    /// Load a saga by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn get(&self, saga_id: SagaId) -> BoxFuture<'_, Result<Option<ReservationSaga>, StoreError>>;

    /// All sagas not yet terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn in_flight(&self) -> BoxFuture<'_, Result<Vec<ReservationSaga>, StoreError>>;

    /// Add a saga to the operator attention list (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn flag(&self, saga_id: SagaId, reason: String) -> BoxFuture<'_, Result<(), StoreError>>;

    /// The operator attention list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn flagged(&self) -> BoxFuture<'_, Result<Vec<(SagaId, String)>, StoreError>>;
}

/// Durable outbox log read by the relay.
pub trait OutboxStore: Send + Sync {
    /// Append one message outside any saga commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn append(&self, message: OutboxMessage) -> BoxFuture<'_, Result<EntryId, StoreError>>;

    /// Partitions that hold at least one pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn pending_partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionKey>, StoreError>>;

    /// Up to `limit` pending entries of `partition`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn pending(
        &self,
        partition: &PartitionKey,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>>;

    /// Load an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn entry(&self, entry_id: EntryId) -> BoxFuture<'_, Result<Option<OutboxEntry>, StoreError>>;

    /// All entries of a partition in id order, any state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn partition_log(
        &self,
        partition: &PartitionKey,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>>;

    /// Mark an entry published after a successful attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown entry.
    fn mark_published(
        &self,
        entry_id: EntryId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Count a failed attempt and schedule the next one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown entry.
    fn record_failure(
        &self,
        entry_id: EntryId,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Count a final failed attempt and park the entry as failed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown entry.
    fn mark_failed(&self, entry_id: EntryId, error: String)
    -> BoxFuture<'_, Result<(), StoreError>>;

    /// Entries parked as failed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn failed(&self) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>>;

    /// Acquire or renew the drain lease of `partition` for `owner` until `until`.
    ///
    /// Returns `false` if another owner holds an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn try_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Release a lease held by `owner`; a no-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on storage faults.
    fn release_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}
