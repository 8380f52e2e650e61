//! End-to-end reservation saga scenarios
//!
//! Drives the coordinator against the in-memory stores and scripted ports:
//! contention on a single resource, payment failures, outbox commit faults,
//! idempotent replays, deadline expiry and compensation that cannot finish.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use seatflow_core::{
    IdempotencyKey, InventoryError, InventoryStore, Money, PaymentError, PaymentMethod,
    PublishState, ReservationSaga, ResourceId, SagaFailure, SagaState, SagaStore, StepName,
    StepOutcome,
};
use seatflow_runtime::{
    CoordinatorConfig, CoordinatorEnvironment, CoordinatorError, HealthReport,
    InMemoryInventoryStore, InMemoryStore, InventoryLedger, LedgerConfig, OutboxRelay, RelayConfig,
    ReservationCoordinator, ReservationRequest, RetryPolicy,
};
use seatflow_testing::{
    FaultyInventoryStore, FaultyStore, ManualClock, ScriptedPaymentPort, ScriptedPublishPort,
    init_test_tracing,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const UNIT_PRICE: u64 = 1_200;

fn concert() -> ResourceId {
    ResourceId::new("concert-2026-11-20")
}

fn request(key: &str, units: u32) -> ReservationRequest {
    ReservationRequest {
        resource_id: concert(),
        units,
        payment_method: PaymentMethod::new("card-4242"),
        idempotency_key: IdempotencyKey::new(key),
    }
}

fn quick_compensation() -> CoordinatorConfig {
    CoordinatorConfig::default().with_compensation_retry(
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    )
}

struct World<S> {
    coordinator: Arc<ReservationCoordinator>,
    ledger: Arc<InventoryLedger>,
    payments: Arc<ScriptedPaymentPort>,
    sagas: Arc<S>,
    clock: Arc<ManualClock>,
}

async fn world_with<S, I>(
    capacity: u32,
    sagas: Arc<S>,
    inventory: Arc<I>,
    config: CoordinatorConfig,
) -> World<S>
where
    S: SagaStore + 'static,
    I: InventoryStore + 'static,
{
    init_test_tracing();
    let clock = Arc::new(ManualClock::default());
    let ledger = Arc::new(InventoryLedger::new(
        inventory,
        clock.clone(),
        LedgerConfig::default(),
    ));
    ledger
        .register(concert(), capacity, Money::from_cents(UNIT_PRICE))
        .await
        .unwrap();
    let payments = Arc::new(ScriptedPaymentPort::new());
    let coordinator = Arc::new(ReservationCoordinator::new(
        CoordinatorEnvironment {
            clock: clock.clone(),
            ledger: Arc::clone(&ledger),
            payments: payments.clone(),
            sagas: sagas.clone(),
        },
        config,
    ));
    World {
        coordinator,
        ledger,
        payments,
        sagas,
        clock,
    }
}

async fn world(capacity: u32, config: CoordinatorConfig) -> World<InMemoryStore> {
    let sagas = Arc::new(InMemoryStore::new(Arc::new(ManualClock::default())));
    world_with(capacity, sagas, Arc::new(InMemoryInventoryStore::new()), config).await
}

async fn available<S>(world: &World<S>) -> u32 {
    world
        .ledger
        .snapshot(&concert())
        .await
        .unwrap()
        .available_capacity
}

fn position(saga: &ReservationSaga, name: StepName, outcome: StepOutcome) -> usize {
    saga.steps
        .iter()
        .position(|s| s.name == name && s.outcome == outcome)
        .unwrap_or_else(|| panic!("no {outcome:?} record for {name}"))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifteen_buyers_for_ten_seats_confirm_exactly_ten() {
    let w = world(10, quick_compensation()).await;

    let buyers = (0..15).map(|n| {
        let coordinator = Arc::clone(&w.coordinator);
        tokio::spawn(async move {
            coordinator
                .reserve_and_confirm(request(&format!("buyer-{n}"), 1))
                .await
        })
    });
    let sagas: Vec<_> = futures::future::join_all(buyers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let confirmed = sagas
        .iter()
        .filter(|s| s.state == SagaState::Completed)
        .count();
    let turned_away: Vec<_> = sagas
        .iter()
        .filter(|s| s.state == SagaState::Compensated)
        .collect();

    assert_eq!(confirmed, 10);
    assert_eq!(turned_away.len(), 5);
    for saga in &turned_away {
        assert!(matches!(
            saga.failure,
            Some(SagaFailure::InsufficientCapacity { requested: 1, .. })
        ));
        assert!(saga.transaction_id().is_none());
    }
    assert_eq!(available(&w).await, 0);
    assert_eq!(w.payments.charges().len(), 10);
    assert!(w.payments.refunds().is_empty());
    assert_eq!(w.sagas.outbox_len(), 15);
}

#[tokio::test]
async fn declined_payment_releases_capacity_and_publishes_compensation() {
    let w = world(10, quick_compensation()).await;
    w.payments
        .script_charge(Err(PaymentError::Declined("insufficient funds".into())));

    let saga = w
        .coordinator
        .reserve_and_confirm(request("declined", 3))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(
        saga.failure,
        Some(SagaFailure::PaymentDeclined("insufficient funds".into()))
    );
    assert_eq!(
        saga.outcomes_of(StepName::ReserveInventory),
        vec![
            StepOutcome::Started,
            StepOutcome::Completed,
            StepOutcome::Compensated
        ]
    );
    assert_eq!(
        saga.outcomes_of(StepName::ChargePayment),
        vec![StepOutcome::Started, StepOutcome::Failed]
    );
    assert_eq!(available(&w).await, 10);
    assert!(w.payments.refunds().is_empty());

    let entries = w.sagas.outbox_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "ReservationCompensated.v1");
    assert_eq!(entries[0].partition.as_str(), concert().as_str());
    assert_eq!(entries[0].publish_state, PublishState::Pending);
}

#[tokio::test]
async fn failed_confirmation_commit_refunds_then_releases() {
    let store = Arc::new(FaultyStore::new(InMemoryStore::new(Arc::new(
        ManualClock::default(),
    ))));
    store.fail_next_commits(1);
    let w = world_with(
        10,
        store,
        Arc::new(InMemoryInventoryStore::new()),
        quick_compensation(),
    )
    .await;

    let saga = w
        .coordinator
        .reserve_and_confirm(request("outbox-down", 2))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::Compensated);
    assert!(matches!(saga.failure, Some(SagaFailure::OutboxUnavailable(_))));

    // Reverse order: the charge is undone before the hold.
    let refunded = position(&saga, StepName::ChargePayment, StepOutcome::Compensated);
    let released = position(&saga, StepName::ReserveInventory, StepOutcome::Compensated);
    assert!(refunded < released);

    assert_eq!(w.payments.refunds(), vec![saga.transaction_id().unwrap().clone()]);
    assert_eq!(available(&w).await, 10);

    // The failed commit wrote nothing; only the compensation is in the outbox.
    let entries = w.sagas.inner().outbox_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "ReservationCompensated.v1");

    let stored = w.coordinator.saga_status(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(stored.state, SagaState::Compensated);
}

#[tokio::test]
async fn repeated_key_replays_without_charging_twice() {
    let w = world(10, quick_compensation()).await;

    let first = w
        .coordinator
        .reserve_and_confirm(request("checkout-77", 2))
        .await
        .unwrap();
    let second = w
        .coordinator
        .reserve_and_confirm(request("checkout-77", 2))
        .await
        .unwrap();

    assert_eq!(first.state, SagaState::Completed);
    assert_eq!(second.saga_id, first.saga_id);
    assert_eq!(second.state, SagaState::Completed);
    assert_eq!(w.payments.charges().len(), 1);
    assert_eq!(available(&w).await, 8);
    assert_eq!(w.sagas.outbox_len(), 1);
}

#[tokio::test]
async fn repeated_key_while_running_is_rejected() {
    let w = world(10, quick_compensation()).await;
    w.payments.set_charge_delay(Duration::from_millis(200));

    let running = {
        let coordinator = Arc::clone(&w.coordinator);
        tokio::spawn(async move {
            coordinator
                .reserve_and_confirm(request("double-click", 1))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = w
        .coordinator
        .reserve_and_confirm(request("double-click", 1))
        .await
        .unwrap_err();
    let saga = running.await.unwrap().unwrap();

    assert_eq!(err, CoordinatorError::InFlight(saga.saga_id));
    assert_eq!(saga.state, SagaState::Completed);
    assert_eq!(w.payments.charges().len(), 1);
}

#[tokio::test]
async fn deadline_expiring_during_charge_compensates() {
    let w = world(
        10,
        quick_compensation().with_saga_deadline(Duration::from_millis(50)),
    )
    .await;
    w.payments.set_charge_delay(Duration::from_millis(500));

    let saga = w
        .coordinator
        .reserve_and_confirm(request("slow-gateway", 4))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(saga.failure, Some(SagaFailure::DeadlineExceeded));
    assert!(saga.transaction_id().is_none());
    assert_eq!(available(&w).await, 10);
}

#[tokio::test]
async fn deadline_follows_the_injected_clock() {
    let w = world(
        10,
        quick_compensation().with_saga_deadline(Duration::from_secs(60)),
    )
    .await;
    w.payments.set_charge_delay(Duration::from_millis(100));

    let running = {
        let coordinator = Arc::clone(&w.coordinator);
        tokio::spawn(async move {
            coordinator
                .reserve_and_confirm(request("clock-jump", 2))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    w.clock.advance(chrono::Duration::seconds(61));
    let saga = running.await.unwrap().unwrap();

    // The charge itself succeeded, but the deadline had passed by then.
    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(saga.failure, Some(SagaFailure::DeadlineExceeded));
    assert_eq!(w.payments.refunds().len(), 1);
    assert_eq!(available(&w).await, 10);
}

#[tokio::test]
async fn unknown_resource_fails_without_touching_payments() {
    let w = world(10, quick_compensation()).await;
    let mut req = request("ghost", 1);
    req.resource_id = ResourceId::new("no-such-hall");

    let saga = w.coordinator.reserve_and_confirm(req).await.unwrap();

    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(saga.failure, Some(SagaFailure::ResourceNotFound));
    assert!(w.payments.charges().is_empty());
}

#[tokio::test]
async fn stuck_release_surfaces_as_compensation_failed() {
    let sagas = Arc::new(InMemoryStore::new(Arc::new(ManualClock::default())));
    let inventory = Arc::new(FaultyInventoryStore::new(InMemoryInventoryStore::new()));
    let w = world_with(10, sagas, inventory.clone(), quick_compensation()).await;
    w.payments
        .script_charge(Err(PaymentError::Declined("card expired".into())));
    inventory.fail_releases(true);

    let saga = w
        .coordinator
        .reserve_and_confirm(request("release-broken", 2))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::CompensationFailed);
    assert_eq!(saga.failed_compensations(), vec![StepName::ReserveInventory]);
    assert!(saga.compensation_error().is_some());
    assert_eq!(available(&w).await, 8);

    let flagged = w.coordinator.needs_attention().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].0, saga.saga_id);

    let entries = w.sagas.outbox_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "CompensationFailed.v1");

    let relay = OutboxRelay::new(
        w.sagas.clone(),
        Arc::new(ScriptedPublishPort::new()),
        Arc::new(ManualClock::default()),
        RelayConfig::default(),
    );
    let health = HealthReport::collect(&w.coordinator, &relay).await;
    assert!(health.is_degraded());

    // Once the store recovers an operator can finish the release by hand.
    inventory.fail_releases(false);
    w.ledger.release(saga.hold_token().unwrap()).await.unwrap();
    assert_eq!(available(&w).await, 10);
}

#[tokio::test]
async fn failed_refund_still_releases_the_hold() {
    let store = Arc::new(FaultyStore::new(InMemoryStore::new(Arc::new(
        ManualClock::default(),
    ))));
    store.fail_next_commits(1);
    let w = world_with(
        10,
        store,
        Arc::new(InMemoryInventoryStore::new()),
        quick_compensation(),
    )
    .await;
    w.payments
        .script_refund(Err(PaymentError::Declined("refund window closed".into())));

    let saga = w
        .coordinator
        .reserve_and_confirm(request("refund-refused", 3))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::CompensationFailed);
    assert_eq!(
        saga.outcomes_of(StepName::ChargePayment),
        vec![
            StepOutcome::Started,
            StepOutcome::Completed,
            StepOutcome::CompensationFailed
        ]
    );
    assert_eq!(
        saga.outcomes_of(StepName::ReserveInventory),
        vec![
            StepOutcome::Started,
            StepOutcome::Completed,
            StepOutcome::Compensated
        ]
    );
    assert_eq!(saga.failed_compensations(), vec![StepName::ChargePayment]);
    assert_eq!(w.payments.refunds().len(), 1);
    assert_eq!(available(&w).await, 10);

    let flagged = w.coordinator.needs_attention().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].0, saga.saga_id);
}

#[tokio::test]
async fn gateway_outage_is_reported_as_unavailable() {
    let w = world(10, quick_compensation()).await;
    w.payments
        .script_charge(Err(PaymentError::GatewayUnavailable("503".into())));

    let saga = w
        .coordinator
        .reserve_and_confirm(request("gateway-503", 1))
        .await
        .unwrap();

    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(
        saga.failure,
        Some(SagaFailure::PaymentUnavailable("503".into()))
    );
    assert_eq!(available(&w).await, 10);
}

#[tokio::test]
async fn release_of_a_foreign_token_is_rejected() {
    let w = world(10, quick_compensation()).await;
    let other = InventoryLedger::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(ManualClock::default()),
        LedgerConfig::default(),
    );
    other
        .register(concert(), 10, Money::from_cents(UNIT_PRICE))
        .await
        .unwrap();
    let foreign = other.reserve(&concert(), 1).await.unwrap();

    let err = w.ledger.release(&foreign).await.unwrap_err();
    assert_eq!(err, InventoryError::UnknownHold(foreign.hold_id));
}
