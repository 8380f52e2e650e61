//! Property tests for the inventory ledger
//!
//! Whatever the sequence of reservations and releases, the ledger never
//! hands out more units than it holds and a release is applied at most once.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use seatflow_core::{InventoryError, Money, ResourceId};
use seatflow_runtime::{InMemoryInventoryStore, InventoryLedger, LedgerConfig};
use seatflow_testing::properties::{capacity_and_requests, release_picks};
use seatflow_testing::test_clock;
use std::collections::HashSet;
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

async fn ledger(capacity: u32) -> (InventoryLedger, ResourceId) {
    let ledger = InventoryLedger::new(
        Arc::new(InMemoryInventoryStore::new()),
        test_clock(),
        LedgerConfig::default(),
    );
    let resource = ResourceId::new("arena");
    ledger
        .register(resource.clone(), capacity, Money::from_cents(500))
        .await
        .unwrap();
    (ledger, resource)
}

proptest! {
    #[test]
    fn reservations_never_exceed_capacity((capacity, requests) in capacity_and_requests()) {
        let (granted, available) = block_on(async {
            let (ledger, resource) = ledger(capacity).await;
            let mut granted = 0u32;
            for units in &requests {
                match ledger.reserve(&resource, *units).await {
                    Ok(hold) => {
                        assert_eq!(hold.units, *units);
                        assert_eq!(hold.amount, Money::from_cents(500 * u64::from(*units)));
                        granted += units;
                    }
                    Err(InventoryError::InsufficientCapacity { requested, available }) => {
                        assert_eq!(requested, *units);
                        assert!(available < *units);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            let record = ledger.snapshot(&resource).await.unwrap();
            (granted, record.available_capacity)
        });

        prop_assert!(granted <= capacity);
        prop_assert_eq!(granted + available, capacity);
    }

    #[test]
    fn releasing_twice_returns_capacity_once(
        (capacity, requests) in capacity_and_requests(),
        picks in release_picks(),
    ) {
        let (expected, available) = block_on(async {
            let (ledger, resource) = ledger(capacity).await;
            let mut holds = Vec::new();
            for units in &requests {
                if let Ok(hold) = ledger.reserve(&resource, *units).await {
                    holds.push(hold);
                }
            }

            let mut released = HashSet::new();
            if !holds.is_empty() {
                for pick in &picks {
                    let index = pick % holds.len();
                    ledger.release(&holds[index]).await.unwrap();
                    released.insert(index);
                }
            }

            let still_held: u32 = holds
                .iter()
                .enumerate()
                .filter(|(i, _)| !released.contains(i))
                .map(|(_, h)| h.units)
                .sum();
            let record = ledger.snapshot(&resource).await.unwrap();
            (capacity - still_held, record.available_capacity)
        });

        prop_assert_eq!(available, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_settle_exactly_at_capacity() {
    let (ledger, resource) = ledger(10).await;
    let ledger = Arc::new(ledger);

    let tasks = (0..15).map(|_| {
        let ledger = Arc::clone(&ledger);
        let resource = resource.clone();
        tokio::spawn(async move { ledger.reserve(&resource, 1).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let held = outcomes.iter().filter(|o| o.is_ok()).count();
    let refused = outcomes
        .iter()
        .filter(|o| matches!(o, Err(InventoryError::InsufficientCapacity { .. })))
        .count();
    assert_eq!(held, 10);
    assert_eq!(refused, 5);

    let record = ledger.snapshot(&resource).await.unwrap();
    assert_eq!(record.available_capacity, 0);
    assert_eq!(record.held(), 10);

    // Concurrent releases of the same holds still restore each unit once.
    let releases = outcomes
        .into_iter()
        .flatten()
        .flat_map(|hold| {
            let first = {
                let ledger = Arc::clone(&ledger);
                let hold = hold.clone();
                tokio::spawn(async move { ledger.release(&hold).await })
            };
            let second = {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.release(&hold).await })
            };
            [first, second]
        })
        .collect::<Vec<_>>();
    for joined in futures::future::join_all(releases).await {
        joined.unwrap().unwrap();
    }
    assert_eq!(
        ledger.snapshot(&resource).await.unwrap().available_capacity,
        10
    );
}
