//! # Seatflow Testing
//!
//! Deterministic test doubles for the seatflow runtime.
//!
//! This crate provides:
//! - Fixed and manually advanced clocks
//! - Scripted payment and publish ports that record every call
//! - Store wrappers that inject storage faults
//! - proptest strategies for reservation workloads
//!
//! ## Example
//!
//! ```
//! use seatflow_testing::{ScriptedPaymentPort, ManualClock};
//! use seatflow_core::{PaymentError, Clock};
//!
//! let clock = ManualClock::default();
//! let before = clock.now();
//! clock.advance(chrono::Duration::seconds(5));
//! assert_eq!(clock.now() - before, chrono::Duration::seconds(5));
//!
//! let payments = ScriptedPaymentPort::new();
//! payments.script_charge(Err(PaymentError::Declined("card expired".into())));
//! ```

use chrono::{DateTime, Utc};
use seatflow_core::environment::Clock;

/// Scripted payment gateway
pub mod payments;

/// Scripted publish target
pub mod publish;

/// Fault-injecting store wrappers
pub mod faults;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatflow_testing::mocks::FixedClock;
    /// use seatflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to step past outbox backoff, lease expiry and saga deadlines
    /// without sleeping.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> std::sync::Arc<FixedClock> {
        std::sync::Arc::new(FixedClock::new(epoch()))
    }

    /// 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is a constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// A capacity and a sequence of reservation sizes that usually exceeds it.
    pub fn capacity_and_requests() -> impl Strategy<Value = (u32, Vec<u32>)> {
        (1u32..40).prop_flat_map(|capacity| {
            (Just(capacity), prop::collection::vec(1u32..6, 1..40))
        })
    }

    /// Indices of holds to release (possibly repeated) after reserving.
    pub fn release_picks() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(0usize..40, 0..60)
    }
}

/// Install a test-writer subscriber honoring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use faults::{FaultyInventoryStore, FaultyStore};
pub use mocks::{FixedClock, ManualClock, epoch, test_clock};
pub use payments::{ChargeCall, ScriptedPaymentPort};
pub use publish::ScriptedPublishPort;
