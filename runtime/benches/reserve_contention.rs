//! Ledger and saga benchmarks
//!
//! - Uncontended reserve/release round trip on one resource
//! - The same round trip with several tasks racing on the resource
//! - A full reserve, charge and confirm saga against in-memory stores
//!
//! Run with: `cargo bench -p seatflow-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use seatflow_core::{IdempotencyKey, Money, PaymentMethod, ResourceId};
use seatflow_runtime::{
    CoordinatorConfig, CoordinatorEnvironment, InMemoryInventoryStore, InMemoryStore,
    InventoryLedger, LedgerConfig, ReservationCoordinator, ReservationRequest,
};
use seatflow_testing::{ScriptedPaymentPort, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn ledger(runtime: &tokio::runtime::Runtime, capacity: u32) -> (Arc<InventoryLedger>, ResourceId) {
    let ledger = Arc::new(InventoryLedger::new(
        Arc::new(InMemoryInventoryStore::new()),
        test_clock(),
        LedgerConfig::default(),
    ));
    let resource = ResourceId::new("bench-hall");
    runtime
        .block_on(ledger.register(resource.clone(), capacity, Money::from_cents(1_000)))
        .expect("Failed to register resource");
    (ledger, resource)
}

/// Reserve then release one unit, no contention.
fn benchmark_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let (ledger, resource) = ledger(&runtime, 1_000);

    group.bench_function("reserve_release", |b| {
        b.to_async(&runtime).iter(|| async {
            let hold = ledger
                .reserve(&resource, black_box(1))
                .await
                .expect("capacity is returned every iteration");
            ledger.release(&hold).await.expect("Release failed");
        });
    });

    group.finish();
}

/// `tasks` tasks each reserve and release one unit on the same resource.
fn benchmark_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_contention");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let (ledger, resource) = ledger(&runtime, 1_000);

    for tasks in [2usize, 8, 32] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&runtime).iter(|| async {
                let handles: Vec<_> = (0..tasks)
                    .map(|_| {
                        let ledger = Arc::clone(&ledger);
                        let resource = resource.clone();
                        tokio::spawn(async move {
                            if let Ok(hold) = ledger.reserve(&resource, 1).await {
                                let _ = ledger.release(&hold).await;
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.await.expect("Task failed");
                }
            });
        });
    }

    group.finish();
}

/// Happy-path saga: reserve, charge, commit confirmation with its outbox entry.
fn benchmark_saga(c: &mut Criterion) {
    let mut group = c.benchmark_group("saga");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let (ledger, resource) = ledger(&runtime, u32::MAX);
    let clock = test_clock();
    let coordinator = ReservationCoordinator::new(
        CoordinatorEnvironment {
            clock: clock.clone(),
            ledger,
            payments: Arc::new(ScriptedPaymentPort::new()),
            sagas: Arc::new(InMemoryStore::new(clock)),
        },
        CoordinatorConfig::default(),
    );
    let next_key = AtomicU64::new(0);

    group.bench_function("reserve_and_confirm", |b| {
        b.to_async(&runtime).iter(|| async {
            let n = next_key.fetch_add(1, Ordering::Relaxed);
            let saga = coordinator
                .reserve_and_confirm(ReservationRequest {
                    resource_id: resource.clone(),
                    units: 1,
                    payment_method: PaymentMethod::new("card-bench"),
                    idempotency_key: IdempotencyKey::new(format!("bench-{n}")),
                })
                .await
                .expect("Saga failed");
            black_box(saga);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_trip,
    benchmark_contention,
    benchmark_saga,
);
criterion_main!(benches);
