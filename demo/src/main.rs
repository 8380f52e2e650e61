//! Seatflow demo - concurrent checkouts against one concert hall
//!
//! Registers a resource, runs a burst of concurrent reservations through the
//! coordinator with a scripted payment gateway (some cards are declined),
//! lets the outbox relay publish the resulting events and prints a summary.
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=seatflow=debug cargo run -p seatflow-demo
//! ```
//!
//! Set `SEATFLOW_METRICS_ADDR=0.0.0.0:9000` to expose Prometheus metrics
//! while the demo runs.

#![allow(missing_docs)]

use seatflow_core::{
    IdempotencyKey, Money, PaymentError, PaymentMethod, ResourceId, SagaState, SystemClock,
};
use seatflow_runtime::metrics::MetricsServer;
use seatflow_runtime::{
    Config, CoordinatorEnvironment, HealthReport, InMemoryInventoryStore, InMemoryStore,
    InventoryLedger, OutboxRelay, ReservationCoordinator, ReservationRequest,
};
use seatflow_testing::{ScriptedPaymentPort, ScriptedPublishPort};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CAPACITY: u32 = 40;
const CUSTOMERS: u32 = 30;
const DECLINED_EVERY: u32 = 7;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start()?;
    }

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InventoryLedger::new(
        Arc::new(InMemoryInventoryStore::new()),
        clock.clone(),
        config.ledger.clone(),
    ));
    let hall = ResourceId::new("hall-a/2026-11-20");
    ledger
        .register(hall.clone(), CAPACITY, Money::from_cents(4_550))
        .await?;

    let payments = Arc::new(ScriptedPaymentPort::new());
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let coordinator = Arc::new(ReservationCoordinator::new(
        CoordinatorEnvironment {
            clock: clock.clone(),
            ledger: Arc::clone(&ledger),
            payments: payments.clone(),
            sagas: store.clone(),
        },
        config.coordinator.clone(),
    ));

    let publisher = Arc::new(ScriptedPublishPort::new());
    publisher.fail_transiently(2);
    let relay = Arc::new(OutboxRelay::new(
        store.clone(),
        publisher.clone(),
        clock,
        config
            .relay
            .clone()
            .with_interval(Duration::from_millis(50))
            .with_backoff(
                seatflow_runtime::RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(20))
                    .build(),
            ),
    ));
    let relay_handle = Arc::clone(&relay).spawn();

    for _ in 0..CUSTOMERS / DECLINED_EVERY {
        payments.script_charge(Err(PaymentError::Declined("card declined".into())));
    }

    let requests = (1..=CUSTOMERS).map(|n| {
        let coordinator = Arc::clone(&coordinator);
        let request = ReservationRequest {
            resource_id: hall.clone(),
            units: n % 3 + 1,
            payment_method: PaymentMethod::new(format!("card-{n:04}")),
            idempotency_key: IdempotencyKey::new(format!("checkout-{n}")),
        };
        tokio::spawn(async move { coordinator.reserve_and_confirm(request).await })
    });

    let mut completed = 0;
    let mut compensated = 0;
    for outcome in futures::future::join_all(requests).await {
        let saga = outcome??;
        match saga.state {
            SagaState::Completed => completed += 1,
            _ => {
                compensated += 1;
                tracing::info!(
                    saga_id = %saga.saga_id,
                    state = %saga.state,
                    failure = ?saga.failure,
                    "Reservation not confirmed"
                );
            }
        }
    }

    // Give the relay time to work through the transient broker failures.
    tokio::time::sleep(Duration::from_millis(500)).await;
    relay_handle.shutdown().await?;
    let report = relay.drain().await?;

    let record = ledger.snapshot(&hall).await?;
    let health = HealthReport::collect(&coordinator, &relay).await;

    tracing::info!(
        completed,
        compensated,
        available = record.available_capacity,
        held = record.held(),
        outbox_entries = store.outbox_len(),
        published = publisher.published().len(),
        last_pass_published = report.published,
        health = %health.status,
        "Demo finished"
    );

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        tracing::debug!(metrics = %rendered, "Final metrics");
    }

    Ok(())
}
