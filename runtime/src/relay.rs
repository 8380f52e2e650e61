//! Outbox relay.
//!
//! Publishes pending outbox entries partition by partition, oldest first.
//! A partition is drained only under a lease, so two relays never publish
//! the same partition concurrently. Within a partition a transiently failing
//! entry blocks everything behind it until it is delivered or parked as
//! `FAILED`; failed entries are skipped and stay listed for an operator.

use crate::HealthCheck;
use crate::config::RelayConfig;
use crate::metrics::OutboxMetrics;
use seatflow_core::environment::Clock;
use seatflow_core::store::{OutboxStore, StoreError};
use seatflow_core::{DateTime, OutboxEntry, PartitionKey, PublishError, PublishPort, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Counts from one [`OutboxRelay::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries delivered
    pub published: usize,
    /// Entries that failed transiently and were rescheduled
    pub retried: usize,
    /// Entries parked as failed
    pub failed: usize,
    /// Partitions drained under our lease
    pub partitions_drained: usize,
    /// Partitions skipped because another relay holds the lease
    pub partitions_skipped: usize,
}

impl DrainReport {
    /// Whether the pass changed any entry.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.published == 0 && self.retried == 0 && self.failed == 0
    }
}

enum Step {
    Continue,
    Stop,
}

/// Background publisher for the outbox.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn PublishPort>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    owner: String,
}

impl OutboxRelay {
    /// Create a relay with a random lease owner id.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn PublishPort>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            config,
            owner: format!("relay-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Override the lease owner id.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Lease owner id of this relay.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Run one pass over every partition with pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the outbox store fails; entries already
    /// handled in this pass keep their new state.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();

        for partition in self.store.pending_partitions().await? {
            if !self.lease(&partition).await? {
                report.partitions_skipped += 1;
                OutboxMetrics::record_skipped();
                tracing::debug!(partition = %partition, "Partition leased by another relay");
                continue;
            }

            let result = self.drain_partition(&partition, &mut report).await;
            if let Err(e) = self.store.release_lease(&partition, &self.owner).await {
                tracing::warn!(partition = %partition, error = %e, "Could not release lease");
            }
            result?;
            report.partitions_drained += 1;
        }

        if report.failed > 0 {
            OutboxMetrics::record_failed_size(self.store.failed().await?.len());
        }
        if !report.is_idle() {
            tracing::debug!(
                published = report.published,
                retried = report.retried,
                failed = report.failed,
                "Outbox drain pass finished"
            );
        }
        Ok(report)
    }

    /// Drain every `interval` until `shutdown` becomes `true` or its sender
    /// is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            owner = %self.owner,
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            topic = %self.config.topic,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain().await {
                        tracing::error!(error = %e, "Outbox drain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(owner = %self.owner, "Outbox relay stopped");
    }

    /// Run the relay on a background task.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> RelayHandle {
        let (cancel, shutdown) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown).await });
        RelayHandle { cancel, task }
    }

    /// Degraded while any entry is parked as failed.
    pub async fn health(&self) -> HealthCheck {
        match self.store.failed().await {
            Ok(failed) if failed.is_empty() => HealthCheck::healthy("outbox_relay"),
            Ok(failed) => HealthCheck::degraded(
                "outbox_relay",
                format!("{} outbox entries failed permanently", failed.len()),
            )
            .with_metadata("failed", failed.len().to_string()),
            Err(e) => HealthCheck::unhealthy("outbox_relay", e.to_string()),
        }
    }

    async fn lease(&self, partition: &PartitionKey) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let until = chrono::Duration::from_std(self.config.lease_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store.try_lease(partition, &self.owner, now, until).await
    }

    async fn drain_partition(
        &self,
        partition: &PartitionKey,
        report: &mut DrainReport,
    ) -> Result<(), StoreError> {
        let entries = self.store.pending(partition, self.config.batch_size).await?;

        for entry in entries {
            if !entry.is_due(self.clock.now()) {
                break;
            }
            // Renew before each publish; stop if the lease was taken over.
            if !self.lease(partition).await? {
                tracing::warn!(partition = %partition, "Lost partition lease mid-drain");
                break;
            }
            if let Step::Stop = self.publish(&entry, report).await? {
                break;
            }
        }
        Ok(())
    }

    async fn publish(&self, entry: &OutboxEntry, report: &mut DrainReport) -> Result<Step, StoreError> {
        let call = self.publisher.publish(
            &self.config.topic,
            entry.partition.as_str(),
            entry.payload.clone(),
        );
        let outcome = tokio::time::timeout(self.config.publish_timeout, call)
            .await
            .unwrap_or_else(|_| Err(PublishError::TransientFailure("publish timed out".to_string())));

        match outcome {
            Ok(()) => {
                self.store
                    .mark_published(entry.entry_id, self.clock.now())
                    .await?;
                report.published += 1;
                OutboxMetrics::record_published();
                tracing::debug!(
                    entry_id = %entry.entry_id,
                    partition = %entry.partition,
                    event_type = %entry.event_type,
                    "Outbox entry published"
                );
                Ok(Step::Continue)
            }
            Err(PublishError::PermanentFailure(reason)) => {
                self.park(entry, reason).await?;
                report.failed += 1;
                Ok(Step::Continue)
            }
            Err(PublishError::TransientFailure(reason)) => {
                let attempts = entry.attempt_count + 1;
                if attempts >= self.config.max_attempts {
                    self.park(entry, format!("gave up after {attempts} attempts: {reason}"))
                        .await?;
                    report.failed += 1;
                    return Ok(Step::Continue);
                }

                let delay = self.config.backoff.chrono_delay_for_attempt(entry.attempt_count);
                let now = self.clock.now();
                let next_attempt_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.store
                    .record_failure(entry.entry_id, next_attempt_at, reason.clone())
                    .await?;
                report.retried += 1;
                OutboxMetrics::record_retried();
                tracing::warn!(
                    entry_id = %entry.entry_id,
                    partition = %entry.partition,
                    attempt = attempts,
                    next_attempt_at = %next_attempt_at,
                    error = %reason,
                    "Publish failed, retrying later"
                );
                Ok(Step::Stop)
            }
        }
    }

    async fn park(&self, entry: &OutboxEntry, reason: String) -> Result<(), StoreError> {
        tracing::error!(
            entry_id = %entry.entry_id,
            partition = %entry.partition,
            event_type = %entry.event_type,
            error = %reason,
            "Outbox entry failed permanently"
        );
        self.store.mark_failed(entry.entry_id, reason).await?;
        OutboxMetrics::record_failed();
        Ok(())
    }
}

impl std::fmt::Debug for OutboxRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxRelay")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a relay running in the background.
#[derive(Debug)]
pub struct RelayHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for the current pass to finish.
    ///
    /// # Errors
    ///
    /// Returns the join error if the relay task panicked.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.cancel.send(true);
        self.task.await
    }
}
