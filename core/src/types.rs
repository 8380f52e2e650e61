//! Identifier and value types shared by every component.
//!
//! All identifiers are newtypes so a `SagaId` can never be passed where a
//! `HoldId` is expected. String-backed identifiers follow the same rules:
//!
//! - `FromStr::from_str()` validates input (rejects empty or blank strings)
//! - `new()` and `From` do not validate (for trusted, application-built values)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Mul;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an identifier from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {value:?}")]
pub struct ParseIdError {
    /// Which identifier failed to parse
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` without validation.")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(ParseIdError {
                        kind: $kind,
                        value: s.to_string(),
                    });
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a bookable resource (a concert, a showing, a section).
    ///
    /// # Examples
    ///
    /// ```
    /// use seatflow_core::types::ResourceId;
    ///
    /// let id: ResourceId = "concert-42".parse().unwrap();
    /// assert_eq!(id.as_str(), "concert-42");
    /// assert!("  ".parse::<ResourceId>().is_err());
    /// ```
    ResourceId,
    "resource id"
);

string_id!(
    /// Caller-supplied key that makes `reserve_and_confirm` safe to retry.
    IdempotencyKey,
    "idempotency key"
);

string_id!(
    /// Gateway-issued identifier of a successful charge; the refund handle.
    TransactionId,
    "transaction id"
);

string_id!(
    /// Outbox ordering group. Entries sharing a key are published in order.
    PartitionKey,
    "partition key"
);

string_id!(
    /// Opaque payment instrument token (card token, wallet id, ...).
    PaymentMethod,
    "payment method"
);

impl From<&ResourceId> for PartitionKey {
    fn from(id: &ResourceId) -> Self {
        Self(id.0.clone())
    }
}

uuid_id!(
    /// Unique identifier of a reservation saga
    SagaId
);

uuid_id!(
    /// Unique identifier of an inventory hold
    HoldId
);

/// Outbox entry identifier.
///
/// Assigned by the store from a single monotonically increasing counter, so
/// ordering by `EntryId` is ordering by append time within every partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// Wrap a raw entry number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw entry number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The identifier following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monetary amount in minor units (cents).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Amount from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Amount in cents.
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Multiply by a unit count, `None` on overflow.
    #[must_use]
    pub const fn checked_mul(self, units: u32) -> Option<Self> {
        match self.0.checked_mul(units as u64) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl Mul<u32> for Money {
    type Output = Self;

    fn mul(self, units: u32) -> Self {
        Self(self.0.saturating_mul(u64::from(units)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn blank_string_ids_are_rejected() {
        assert!("".parse::<ResourceId>().is_err());
        assert!(" \t".parse::<IdempotencyKey>().is_err());
        let err = "".parse::<PartitionKey>().unwrap_err();
        assert_eq!(err.kind, "partition key");
    }

    #[test]
    fn partition_key_defaults_to_resource_id() {
        let resource = ResourceId::new("hall-a");
        assert_eq!(PartitionKey::from(&resource).as_str(), "hall-a");
    }

    #[test]
    fn entry_ids_are_ordered() {
        let first = EntryId::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().value(), 2);
    }

    #[test]
    fn money_formats_and_multiplies() {
        let price = Money::from_cents(4_550);
        assert_eq!((price * 3).cents(), 13_650);
        assert_eq!(price.to_string(), "45.50");
        assert_eq!(Money::from_cents(u64::MAX).checked_mul(2), None);
    }
}
