use futures::future::BoxFuture;
use seatflow_core::inventory::{ApplyOutcome, HoldChange, InventoryUpdate};
use seatflow_core::store::{Claim, InventoryStore, OutboxStore, SagaStore, StoreError};
use seatflow_core::{
    DateTime, EntryId, HoldId, HoldToken, IdempotencyKey, InventoryRecord, OutboxEntry,
    OutboxMessage, PartitionKey, ReservationSaga, ResourceId, SagaId, Utc,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn injected<'a, T: Send + 'a>() -> BoxFuture<'a, Result<T, StoreError>> {
    Box::pin(async { Err(StoreError::Unavailable("injected fault".to_string())) })
}

/// Saga and outbox store wrapper that fails on demand.
///
/// Wraps any store implementing both [`SagaStore`] and [`OutboxStore`].
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    down: AtomicBool,
    failing_commits: AtomicUsize,
}

impl<S> FaultyStore<S> {
    /// Wrap `inner`; no faults are injected until asked.
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failing_commits: AtomicUsize::new(0),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every call while `down` is set.
    pub fn fail_all(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` commits; nothing is written by a failed commit.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<S: SagaStore> SagaStore for FaultyStore<S> {
    fn claim(
        &self,
        key: IdempotencyKey,
        saga: ReservationSaga,
    ) -> BoxFuture<'_, Result<Claim, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.claim(key, saga)
    }

    fn save(&self, saga: ReservationSaga) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.save(saga)
    }

    fn commit(
        &self,
        saga: ReservationSaga,
        messages: Vec<OutboxMessage>,
    ) -> BoxFuture<'_, Result<Vec<EntryId>, StoreError>> {
        if self.is_down() || self.take_commit_failure() {
            return injected();
        }
        self.inner.commit(saga, messages)
    }

    fn get(&self, saga_id: SagaId) -> BoxFuture<'_, Result<Option<ReservationSaga>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.get(saga_id)
    }

    fn in_flight(&self) -> BoxFuture<'_, Result<Vec<ReservationSaga>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.in_flight()
    }

    fn flag(&self, saga_id: SagaId, reason: String) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.flag(saga_id, reason)
    }

    fn flagged(&self) -> BoxFuture<'_, Result<Vec<(SagaId, String)>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.flagged()
    }
}

impl<S: OutboxStore> OutboxStore for FaultyStore<S> {
    fn append(&self, message: OutboxMessage) -> BoxFuture<'_, Result<EntryId, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.append(message)
    }

    fn pending_partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionKey>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.pending_partitions()
    }

    fn pending(
        &self,
        partition: &PartitionKey,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.pending(partition, limit)
    }

    fn entry(&self, entry_id: EntryId) -> BoxFuture<'_, Result<Option<OutboxEntry>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.entry(entry_id)
    }

    fn partition_log(
        &self,
        partition: &PartitionKey,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.partition_log(partition)
    }

    fn mark_published(
        &self,
        entry_id: EntryId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.mark_published(entry_id, at)
    }

    fn record_failure(
        &self,
        entry_id: EntryId,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.record_failure(entry_id, next_attempt_at, error)
    }

    fn mark_failed(
        &self,
        entry_id: EntryId,
        error: String,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.mark_failed(entry_id, error)
    }

    fn failed(&self) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.failed()
    }

    fn try_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.try_lease(partition, owner, now, until)
    }

    fn release_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.release_lease(partition, owner)
    }
}

/// Inventory store wrapper that fails on demand.
#[derive(Debug)]
pub struct FaultyInventoryStore<S> {
    inner: S,
    down: AtomicBool,
    failing_releases: AtomicBool,
}

impl<S> FaultyInventoryStore<S> {
    /// Wrap `inner`; no faults are injected until asked.
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failing_releases: AtomicBool::new(false),
        }
    }

    /// Fail every call while `down` is set.
    pub fn fail_all(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail every update that consumes a hold while `failing` is set.
    pub fn fail_releases(&self, failing: bool) {
        self.failing_releases.store(failing, Ordering::SeqCst);
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

impl<S: InventoryStore> InventoryStore for FaultyInventoryStore<S> {
    fn insert(&self, record: InventoryRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.insert(record)
    }

    fn load(
        &self,
        resource_id: &ResourceId,
    ) -> BoxFuture<'_, Result<Option<InventoryRecord>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.load(resource_id)
    }

    fn hold(
        &self,
        resource_id: &ResourceId,
        hold_id: HoldId,
    ) -> BoxFuture<'_, Result<Option<(HoldToken, bool)>, StoreError>> {
        if self.is_down() {
            return injected();
        }
        self.inner.hold(resource_id, hold_id)
    }

    fn apply(&self, update: InventoryUpdate) -> BoxFuture<'_, Result<ApplyOutcome, StoreError>> {
        let releasing = matches!(update.hold, HoldChange::Consume(_));
        if self.is_down() || (releasing && self.failing_releases.load(Ordering::SeqCst)) {
            return injected();
        }
        self.inner.apply(update)
    }
}
