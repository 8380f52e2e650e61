//! In-memory implementations of the storage traits.
//!
//! - [`InMemoryInventoryStore`] keeps one lock per resource, so updates to
//!   different resources never wait on each other.
//! - [`InMemoryStore`] keeps sagas and the outbox behind a single lock, which
//!   is what makes [`SagaStore::commit`] atomic.
//!
//! Poisoned locks are recovered with `PoisonError::into_inner`: every critical
//! section either completes its writes or performs none.

use futures::future::BoxFuture;
use seatflow_core::environment::Clock;
use seatflow_core::inventory::{ApplyOutcome, HoldChange, InventoryUpdate};
use seatflow_core::store::{Claim, InventoryStore, OutboxStore, SagaStore, StoreError};
use seatflow_core::{
    DateTime, EntryId, HoldId, HoldToken, IdempotencyKey, InventoryRecord, OutboxEntry,
    OutboxMessage, PartitionKey, PublishState, ReservationSaga, ResourceId, SagaId, Utc,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug)]
struct HoldEntry {
    token: HoldToken,
    consumed: bool,
}

#[derive(Debug)]
struct Slot {
    record: InventoryRecord,
    holds: HashMap<HoldId, HoldEntry>,
}

/// In-memory [`InventoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    slots: RwLock<HashMap<ResourceId, Arc<Mutex<Slot>>>>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, resource_id: &ResourceId) -> Option<Arc<Mutex<Slot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
            .cloned()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert(&self, record: InventoryRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            if slots.contains_key(&record.resource_id) {
                return Err(StoreError::Conflict(format!(
                    "resource {} already registered",
                    record.resource_id
                )));
            }
            slots.insert(
                record.resource_id.clone(),
                Arc::new(Mutex::new(Slot {
                    record,
                    holds: HashMap::new(),
                })),
            );
            Ok(())
        })
    }

    fn load(
        &self,
        resource_id: &ResourceId,
    ) -> BoxFuture<'_, Result<Option<InventoryRecord>, StoreError>> {
        let slot = self.slot(resource_id);
        Box::pin(async move {
            Ok(slot.map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record
                    .clone()
            }))
        })
    }

    fn hold(
        &self,
        resource_id: &ResourceId,
        hold_id: HoldId,
    ) -> BoxFuture<'_, Result<Option<(HoldToken, bool)>, StoreError>> {
        let slot = self.slot(resource_id);
        Box::pin(async move {
            Ok(slot.and_then(|slot| {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                slot.holds
                    .get(&hold_id)
                    .map(|h| (h.token.clone(), h.consumed))
            }))
        })
    }

    fn apply(&self, update: InventoryUpdate) -> BoxFuture<'_, Result<ApplyOutcome, StoreError>> {
        Box::pin(async move {
            let slot = self
                .slot(&update.resource_id)
                .ok_or_else(|| StoreError::NotFound(update.resource_id.to_string()))?;
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

            if slot.record.version != update.expected_version {
                return Ok(ApplyOutcome::VersionConflict {
                    actual: slot.record.version,
                });
            }
            if update.available_capacity > slot.record.total_capacity {
                return Err(StoreError::Conflict(format!(
                    "available capacity {} exceeds total {}",
                    update.available_capacity, slot.record.total_capacity
                )));
            }

            match update.hold {
                HoldChange::Open(token) => {
                    if slot.holds.contains_key(&token.hold_id) {
                        return Err(StoreError::Conflict(format!(
                            "hold {} already exists",
                            token.hold_id
                        )));
                    }
                    slot.holds.insert(
                        token.hold_id,
                        HoldEntry {
                            token,
                            consumed: false,
                        },
                    );
                }
                HoldChange::Consume(hold_id) => match slot.holds.get_mut(&hold_id) {
                    Some(entry) if entry.consumed => return Ok(ApplyOutcome::HoldAlreadyConsumed),
                    Some(entry) => entry.consumed = true,
                    None => return Err(StoreError::NotFound(format!("hold {hold_id}"))),
                },
            }

            slot.record.available_capacity = update.available_capacity;
            slot.record.version += 1;
            Ok(ApplyOutcome::Applied(slot.record.clone()))
        })
    }
}

#[derive(Debug)]
struct Lease {
    owner: String,
    until: DateTime<Utc>,
}

#[derive(Debug)]
struct State {
    sagas: HashMap<SagaId, ReservationSaga>,
    keys: HashMap<IdempotencyKey, SagaId>,
    flagged: Vec<(SagaId, String)>,
    entries: BTreeMap<EntryId, OutboxEntry>,
    next_entry: EntryId,
    leases: HashMap<PartitionKey, Lease>,
}

impl State {
    fn push_entry(&mut self, message: OutboxMessage, now: DateTime<Utc>) -> EntryId {
        let id = self.next_entry;
        self.next_entry = id.next();
        self.entries.insert(id, OutboxEntry::pending(id, message, now));
        id
    }

    fn entry_mut(&mut self, entry_id: EntryId) -> Result<&mut OutboxEntry, StoreError> {
        self.entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {entry_id}")))
    }
}

/// In-memory [`SagaStore`] and [`OutboxStore`] sharing one atomic unit.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store; `clock` stamps outbox entries.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                sagas: HashMap::new(),
                keys: HashMap::new(),
                flagged: Vec::new(),
                entries: BTreeMap::new(),
                next_entry: EntryId::new(1),
                leases: HashMap::new(),
            }),
            clock,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Number of outbox entries in any state.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.with_state(|s| s.entries.len())
    }

    /// Every outbox entry, in id order.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.with_state(|s| s.entries.values().cloned().collect())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SagaStore for InMemoryStore {
    fn claim(
        &self,
        key: IdempotencyKey,
        saga: ReservationSaga,
    ) -> BoxFuture<'_, Result<Claim, StoreError>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                if let Some(existing) = s.keys.get(&key).and_then(|id| s.sagas.get(id)) {
                    return Claim::Existing(existing.clone());
                }
                s.keys.insert(key, saga.saga_id);
                s.sagas.insert(saga.saga_id, saga);
                Claim::Fresh
            }))
        })
    }

    fn save(&self, saga: ReservationSaga) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_state(|s| match s.sagas.get_mut(&saga.saga_id) {
                Some(stored) if stored.is_terminal() => Err(StoreError::Conflict(format!(
                    "saga {} is terminal",
                    saga.saga_id
                ))),
                Some(stored) => {
                    *stored = saga;
                    Ok(())
                }
                None => Err(StoreError::NotFound(format!("saga {}", saga.saga_id))),
            })
        })
    }

    fn commit(
        &self,
        saga: ReservationSaga,
        messages: Vec<OutboxMessage>,
    ) -> BoxFuture<'_, Result<Vec<EntryId>, StoreError>> {
        Box::pin(async move {
            let now = self.clock.now();
            self.with_state(|s| {
                match s.sagas.get(&saga.saga_id) {
                    None => return Err(StoreError::NotFound(format!("saga {}", saga.saga_id))),
                    Some(stored) if stored.is_terminal() => {
                        return Err(StoreError::Conflict(format!(
                            "saga {} is terminal",
                            saga.saga_id
                        )));
                    }
                    Some(_) => {}
                }
                let ids = messages
                    .into_iter()
                    .map(|message| s.push_entry(message, now))
                    .collect();
                s.sagas.insert(saga.saga_id, saga);
                Ok(ids)
            })
        })
    }

    fn get(&self, saga_id: SagaId) -> BoxFuture<'_, Result<Option<ReservationSaga>, StoreError>> {
        Box::pin(async move { Ok(self.with_state(|s| s.sagas.get(&saga_id).cloned())) })
    }

    fn in_flight(&self) -> BoxFuture<'_, Result<Vec<ReservationSaga>, StoreError>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let mut sagas: Vec<_> = s
                    .sagas
                    .values()
                    .filter(|saga| !saga.is_terminal())
                    .cloned()
                    .collect();
                sagas.sort_by_key(|saga| saga.created_at);
                sagas
            }))
        })
    }

    fn flag(&self, saga_id: SagaId, reason: String) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_state(|s| {
                if !s.flagged.iter().any(|(id, _)| *id == saga_id) {
                    s.flagged.push((saga_id, reason));
                }
            });
            Ok(())
        })
    }

    fn flagged(&self) -> BoxFuture<'_, Result<Vec<(SagaId, String)>, StoreError>> {
        Box::pin(async move { Ok(self.with_state(|s| s.flagged.clone())) })
    }
}

impl OutboxStore for InMemoryStore {
    fn append(&self, message: OutboxMessage) -> BoxFuture<'_, Result<EntryId, StoreError>> {
        Box::pin(async move {
            let now = self.clock.now();
            Ok(self.with_state(|s| s.push_entry(message, now)))
        })
    }

    fn pending_partitions(&self) -> BoxFuture<'_, Result<Vec<PartitionKey>, StoreError>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.entries
                    .values()
                    .filter(|e| e.publish_state == PublishState::Pending)
                    .map(|e| e.partition.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            }))
        })
    }

    fn pending(
        &self,
        partition: &PartitionKey,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        let partition = partition.clone();
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.entries
                    .values()
                    .filter(|e| e.partition == partition && e.publish_state == PublishState::Pending)
                    .take(limit)
                    .cloned()
                    .collect()
            }))
        })
    }

    fn entry(&self, entry_id: EntryId) -> BoxFuture<'_, Result<Option<OutboxEntry>, StoreError>> {
        Box::pin(async move { Ok(self.with_state(|s| s.entries.get(&entry_id).cloned())) })
    }

    fn partition_log(
        &self,
        partition: &PartitionKey,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        let partition = partition.clone();
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.entries
                    .values()
                    .filter(|e| e.partition == partition)
                    .cloned()
                    .collect()
            }))
        })
    }

    fn mark_published(
        &self,
        entry_id: EntryId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_state(|s| {
                let entry = s.entry_mut(entry_id)?;
                entry.publish_state = PublishState::Published;
                entry.attempt_count += 1;
                entry.next_attempt_at = None;
                entry.published_at = Some(at);
                Ok(())
            })
        })
    }

    fn record_failure(
        &self,
        entry_id: EntryId,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_state(|s| {
                let entry = s.entry_mut(entry_id)?;
                entry.attempt_count += 1;
                entry.next_attempt_at = Some(next_attempt_at);
                entry.last_error = Some(error);
                Ok(())
            })
        })
    }

    fn mark_failed(
        &self,
        entry_id: EntryId,
        error: String,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_state(|s| {
                let entry = s.entry_mut(entry_id)?;
                entry.publish_state = PublishState::Failed;
                entry.attempt_count += 1;
                entry.next_attempt_at = None;
                entry.last_error = Some(error);
                Ok(())
            })
        })
    }

    fn failed(&self) -> BoxFuture<'_, Result<Vec<OutboxEntry>, StoreError>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.entries
                    .values()
                    .filter(|e| e.publish_state == PublishState::Failed)
                    .cloned()
                    .collect()
            }))
        })
    }

    fn try_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        let partition = partition.clone();
        let owner = owner.to_string();
        Box::pin(async move {
            Ok(self.with_state(|s| match s.leases.get_mut(&partition) {
                Some(lease) if lease.owner != owner && lease.until > now => false,
                Some(lease) => {
                    lease.owner = owner;
                    lease.until = until;
                    true
                }
                None => {
                    s.leases.insert(partition, Lease { owner, until });
                    true
                }
            }))
        })
    }

    fn release_lease(
        &self,
        partition: &PartitionKey,
        owner: &str,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let partition = partition.clone();
        let owner = owner.to_string();
        Box::pin(async move {
            self.with_state(|s| {
                if s.leases.get(&partition).is_some_and(|l| l.owner == owner) {
                    s.leases.remove(&partition);
                }
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use seatflow_core::{Money, SystemClock};

    fn record(id: &str, total: u32) -> InventoryRecord {
        InventoryRecord::new(ResourceId::new(id), total, Money::from_cents(100))
    }

    fn token(id: &str, units: u32) -> HoldToken {
        HoldToken {
            hold_id: HoldId::new(),
            resource_id: ResourceId::new(id),
            units,
            amount: Money::from_cents(100 * u64::from(units)),
            reserved_at: Utc::now(),
        }
    }

    fn message(partition: &str) -> OutboxMessage {
        OutboxMessage {
            partition: PartitionKey::new(partition),
            event_type: "Test.v1".to_string(),
            payload: vec![7],
        }
    }

    #[tokio::test]
    async fn stale_version_is_reported_as_conflict() {
        let store = InMemoryInventoryStore::new();
        store.insert(record("r", 5)).await.unwrap();

        let first = InventoryUpdate {
            resource_id: ResourceId::new("r"),
            expected_version: 0,
            available_capacity: 4,
            hold: HoldChange::Open(token("r", 1)),
        };
        let stale = InventoryUpdate {
            hold: HoldChange::Open(token("r", 1)),
            ..first.clone()
        };

        assert!(matches!(
            store.apply(first).await.unwrap(),
            ApplyOutcome::Applied(ref r) if r.version == 1 && r.available_capacity == 4
        ));
        assert_eq!(
            store.apply(stale).await.unwrap(),
            ApplyOutcome::VersionConflict { actual: 1 }
        );
    }

    #[tokio::test]
    async fn consuming_a_hold_twice_is_detected() {
        let store = InMemoryInventoryStore::new();
        store.insert(record("r", 5)).await.unwrap();
        let hold = token("r", 2);
        store
            .apply(InventoryUpdate {
                resource_id: ResourceId::new("r"),
                expected_version: 0,
                available_capacity: 3,
                hold: HoldChange::Open(hold.clone()),
            })
            .await
            .unwrap();

        let consume = |version| InventoryUpdate {
            resource_id: ResourceId::new("r"),
            expected_version: version,
            available_capacity: 5,
            hold: HoldChange::Consume(hold.hold_id),
        };
        assert!(matches!(
            store.apply(consume(1)).await.unwrap(),
            ApplyOutcome::Applied(_)
        ));
        assert_eq!(
            store.apply(consume(2)).await.unwrap(),
            ApplyOutcome::HoldAlreadyConsumed
        );
        let (_, consumed) = store
            .hold(&ResourceId::new("r"), hold.hold_id)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let store = InMemoryInventoryStore::new();
        store.insert(record("r", 1)).await.unwrap();
        assert!(matches!(
            store.insert(record("r", 1)).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn pending_entries_come_back_in_id_order_per_partition() {
        let store = InMemoryStore::new(Arc::new(SystemClock));
        let a1 = store.append(message("a")).await.unwrap();
        let b1 = store.append(message("b")).await.unwrap();
        let a2 = store.append(message("a")).await.unwrap();

        let pending: Vec<_> = store
            .pending(&PartitionKey::new("a"), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entry_id)
            .collect();
        assert_eq!(pending, vec![a1, a2]);
        assert!(b1 > a1 && a2 > b1);

        store.mark_published(a1, Utc::now()).await.unwrap();
        let pending = store.pending(&PartitionKey::new("a"), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.entry(a1).await.unwrap().unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn lease_excludes_other_owners_until_expiry() {
        let store = InMemoryStore::new(Arc::new(SystemClock));
        let p = PartitionKey::new("p");
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(30);

        assert!(store.try_lease(&p, "one", now, later).await.unwrap());
        assert!(!store.try_lease(&p, "two", now, later).await.unwrap());
        assert!(store.try_lease(&p, "one", now, later).await.unwrap());
        assert!(store.try_lease(&p, "two", later, later).await.unwrap());

        store.release_lease(&p, "one").await.unwrap();
        assert!(!store.try_lease(&p, "one", now, later).await.unwrap());
        store.release_lease(&p, "two").await.unwrap();
        assert!(store.try_lease(&p, "one", now, later).await.unwrap());
    }
}
