//! Runtime configuration.
//!
//! Loaded from `SEATFLOW_*` environment variables with defaults for every
//! value. Each section also has `with_*` setters for programmatic use.

use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
    },
}

/// Inventory ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Compare-and-swap attempts before failing with contention
    pub max_attempts: u32,
    /// Upper bound of the randomized pause between attempts (scaled by attempt)
    pub contention_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            contention_backoff: Duration::from_micros(200),
        }
    }
}

impl LedgerConfig {
    /// Set the attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the contention backoff base
    #[must_use]
    pub const fn with_contention_backoff(mut self, backoff: Duration) -> Self {
        self.contention_backoff = backoff;
        self
    }
}

/// Reservation coordinator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Time the customer has to complete checkout
    pub saga_deadline: Duration,
    /// Upper bound of a single payment gateway call
    pub payment_timeout: Duration,
    /// Extra time past the deadline before an unfinished saga is flagged
    pub stuck_grace: Duration,
    /// Retry policy for refund and release during compensation
    pub compensation_retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            saga_deadline: Duration::from_secs(900),
            payment_timeout: Duration::from_secs(10),
            stuck_grace: Duration::from_secs(300),
            compensation_retry: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(2))
                .build(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the saga deadline
    #[must_use]
    pub const fn with_saga_deadline(mut self, deadline: Duration) -> Self {
        self.saga_deadline = deadline;
        self
    }

    /// Set the payment call timeout
    #[must_use]
    pub const fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    /// Set the stuck-saga grace period
    #[must_use]
    pub const fn with_stuck_grace(mut self, grace: Duration) -> Self {
        self.stuck_grace = grace;
        self
    }

    /// Set the compensation retry policy
    #[must_use]
    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }
}

/// Outbox relay settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Pause between drain passes when running in the background
    pub interval: Duration,
    /// Entries fetched per partition per pass
    pub batch_size: usize,
    /// Publish attempts before an entry is parked as failed
    pub max_attempts: u32,
    /// Validity of a partition drain lease
    pub lease_ttl: Duration,
    /// Upper bound of a single publish call
    pub publish_timeout: Duration,
    /// Destination topic
    pub topic: String,
    /// Delay schedule between publish attempts of one entry
    pub backoff: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            batch_size: 100,
            max_attempts: 8,
            lease_ttl: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(5),
            topic: "reservation-events".to_string(),
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(250))
                .max_delay(Duration::from_secs(60))
                .build(),
        }
    }
}

impl RelayConfig {
    /// Set the drain interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the lease validity
    #[must_use]
    pub const fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the publish call timeout
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the destination topic
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the re-delivery backoff
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Ledger settings
    pub ledger: LedgerConfig,
    /// Coordinator settings
    pub coordinator: CoordinatorConfig,
    /// Relay settings
    pub relay: RelayConfig,
    /// Prometheus exporter address, if metrics should be served
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// defaults (with a warning) if any variable is malformed.
    #[must_use]
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Invalid configuration, using defaults");
            Self::default()
        })
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first malformed or out-of-range
    /// variable.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a fixed set of variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first malformed or out-of-range
    /// variable.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(lookup);

        let ledger = LedgerConfig {
            max_attempts: vars.parse("SEATFLOW_LEDGER_MAX_ATTEMPTS", defaults.ledger.max_attempts)?,
            contention_backoff: vars.micros(
                "SEATFLOW_LEDGER_BACKOFF_US",
                defaults.ledger.contention_backoff,
            )?,
        };

        let coordinator = CoordinatorConfig {
            saga_deadline: vars.secs(
                "SEATFLOW_SAGA_DEADLINE_SECS",
                defaults.coordinator.saga_deadline,
            )?,
            payment_timeout: vars.millis(
                "SEATFLOW_PAYMENT_TIMEOUT_MS",
                defaults.coordinator.payment_timeout,
            )?,
            stuck_grace: vars.secs(
                "SEATFLOW_STUCK_GRACE_SECS",
                defaults.coordinator.stuck_grace,
            )?,
            compensation_retry: RetryPolicy {
                max_retries: vars.parse(
                    "SEATFLOW_COMPENSATION_MAX_RETRIES",
                    defaults.coordinator.compensation_retry.max_retries,
                )?,
                ..defaults.coordinator.compensation_retry
            },
        };

        let relay = RelayConfig {
            interval: vars.millis("SEATFLOW_RELAY_INTERVAL_MS", defaults.relay.interval)?,
            batch_size: vars.parse("SEATFLOW_RELAY_BATCH_SIZE", defaults.relay.batch_size)?,
            max_attempts: vars.parse("SEATFLOW_RELAY_MAX_ATTEMPTS", defaults.relay.max_attempts)?,
            lease_ttl: vars.secs("SEATFLOW_RELAY_LEASE_SECS", defaults.relay.lease_ttl)?,
            publish_timeout: vars.millis(
                "SEATFLOW_RELAY_PUBLISH_TIMEOUT_MS",
                defaults.relay.publish_timeout,
            )?,
            topic: vars
                .raw("SEATFLOW_RELAY_TOPIC")
                .unwrap_or(defaults.relay.topic),
            backoff: defaults.relay.backoff,
        };

        let metrics_addr = match vars.raw("SEATFLOW_METRICS_ADDR") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "SEATFLOW_METRICS_ADDR".to_string(),
                value: raw,
            })?),
            None => None,
        };

        let config = Self {
            ledger,
            coordinator,
            relay,
            metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that parse but cannot work.
    ///
    /// Attempt budgets and the batch size must be at least one. A relay lease
    /// must outlast a single publish call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn reject(key: &str, value: impl ToString) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        if self.ledger.max_attempts == 0 {
            return reject("SEATFLOW_LEDGER_MAX_ATTEMPTS", self.ledger.max_attempts);
        }
        if self.relay.batch_size == 0 {
            return reject("SEATFLOW_RELAY_BATCH_SIZE", self.relay.batch_size);
        }
        if self.relay.max_attempts == 0 {
            return reject("SEATFLOW_RELAY_MAX_ATTEMPTS", self.relay.max_attempts);
        }
        if self.relay.lease_ttl <= self.relay.publish_timeout {
            return reject("SEATFLOW_RELAY_LEASE_SECS", self.relay.lease_ttl.as_secs());
        }
        Ok(())
    }
}

struct Vars<L>(L);

impl<L> Vars<L>
where
    L: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn micros(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_us = u64::try_from(default.as_micros()).unwrap_or(u64::MAX);
        self.parse(key, default_us).map(Duration::from_micros)
    }
}
