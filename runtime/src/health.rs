use crate::coordinator::ReservationCoordinator;
use crate::relay::OutboxRelay;
use chrono::{DateTime, Utc};
use std::fmt;

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HealthStatus {
    /// Working normally
    Healthy,
    /// Working, but something waits for an operator (flagged sagas, failed
    /// outbox entries)
    Degraded,
    /// Its store cannot be reached
    Unhealthy,
}

impl HealthStatus {
    /// `true` for [`HealthStatus::Healthy`]
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// `true` for [`HealthStatus::Degraded`]
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// `true` for [`HealthStatus::Unhealthy`]
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// The worse of the two.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Lowercase name, as shown in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// `coordinator` or `outbox_relay`
    pub component: &'static str,
    /// Probe outcome
    pub status: HealthStatus,
    /// What needs attention, when not healthy
    pub message: Option<String>,
    /// Counts behind the status, e.g. `("flagged", "3")`
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    const fn new(component: &'static str, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component,
            status,
            message,
            metadata: Vec::new(),
        }
    }

    /// Nothing to report.
    #[must_use]
    pub const fn healthy(component: &'static str) -> Self {
        Self::new(component, HealthStatus::Healthy, None)
    }

    /// Working, but `message` needs an operator.
    #[must_use]
    pub fn degraded(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// Not working; `message` says why.
    #[must_use]
    pub fn unhealthy(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Attach a `key = value` pair.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Checks of every component, with the worst status as the overall one.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Worst status among `checks`; healthy when there are none
    pub status: HealthStatus,
    /// One entry per component
    pub checks: Vec<HealthCheck>,
    /// When the report was assembled
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Assemble a report from individual checks.
    #[must_use]
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);
        Self {
            status,
            checks,
            checked_at: Utc::now(),
        }
    }

    /// Probe the coordinator and the relay.
    pub async fn collect(coordinator: &ReservationCoordinator, relay: &OutboxRelay) -> Self {
        Self::from_checks(vec![coordinator.health().await, relay.health().await])
    }

    /// The check for `component`, if it was probed.
    #[must_use]
    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }

    /// See [`HealthStatus::is_healthy`].
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// See [`HealthStatus::is_degraded`].
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    /// See [`HealthStatus::is_unhealthy`].
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}
