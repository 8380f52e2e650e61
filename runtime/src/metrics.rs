//! Prometheus metrics for the ledger, the coordinator and the relay.
//!
//! Components record through the small recorder types below; installing
//! [`MetricsServer`] makes the values scrapeable. Without an installed
//! recorder every call is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics, install the Prometheus recorder and spawn the
    /// scrape endpoint on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common in tests) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                self.handle = Some(handle);
                let addr = self.addr;
                tokio::spawn(async move {
                    // ExporterError has no Debug or Display impl.
                    if exporter.await.is_err() {
                        tracing::error!(%addr, "Metrics endpoint stopped");
                    }
                });
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The installed recorder handle, if this server installed one.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("ledger.reserve.success", "Holds granted");
    describe_counter!(
        "ledger.reserve.insufficient",
        "Reservations refused for lack of capacity"
    );
    describe_counter!(
        "ledger.reserve.contention",
        "Reservations that exhausted their compare-and-swap attempts"
    );
    describe_counter!(
        "ledger.cas.conflict",
        "Version conflicts observed by reserve and release"
    );
    describe_counter!("ledger.release.success", "Holds released");
    describe_counter!(
        "ledger.release.clamped",
        "Releases that would have exceeded total capacity"
    );

    describe_counter!("saga.started", "Sagas created");
    describe_counter!("saga.completed", "Sagas confirmed");
    describe_counter!("saga.compensated", "Sagas fully compensated");
    describe_counter!(
        "saga.compensation_failed",
        "Sagas left with an uncompensated step"
    );
    describe_counter!("saga.replayed", "Requests answered from an existing saga");
    describe_counter!("saga.flagged", "Sagas added to the operator attention list");
    describe_histogram!(
        "saga.duration_seconds",
        "Time from saga start to a terminal state"
    );

    describe_counter!("outbox.published", "Outbox entries delivered");
    describe_counter!("outbox.retried", "Transient publish failures scheduled for retry");
    describe_counter!("outbox.failed", "Outbox entries parked as failed");
    describe_counter!(
        "outbox.partition.skipped",
        "Partitions skipped because another relay holds the lease"
    );
    describe_gauge!("outbox.failed.size", "Outbox entries currently parked as failed");
}

/// Inventory ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record a granted hold.
    pub fn record_reserved() {
        counter!("ledger.reserve.success").increment(1);
    }

    /// Record a refusal for lack of capacity.
    pub fn record_insufficient() {
        counter!("ledger.reserve.insufficient").increment(1);
    }

    /// Record an exhausted attempt budget.
    pub fn record_contention() {
        counter!("ledger.reserve.contention").increment(1);
    }

    /// Record one version conflict.
    pub fn record_conflict() {
        counter!("ledger.cas.conflict").increment(1);
    }

    /// Record a release; `clamped` when it was capped at total capacity.
    pub fn record_released(clamped: bool) {
        counter!("ledger.release.success").increment(1);
        if clamped {
            counter!("ledger.release.clamped").increment(1);
        }
    }
}

/// Saga metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record a new saga.
    pub fn record_started() {
        counter!("saga.started").increment(1);
    }

    /// Record a request answered from an existing saga.
    pub fn record_replayed() {
        counter!("saga.replayed").increment(1);
    }

    /// Record a confirmed saga.
    pub fn record_completed(duration: Duration) {
        counter!("saga.completed").increment(1);
        histogram!("saga.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a compensated saga.
    pub fn record_compensated(duration: Duration) {
        counter!("saga.compensated").increment(1);
        histogram!("saga.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a saga whose compensation failed.
    pub fn record_compensation_failed() {
        counter!("saga.compensation_failed").increment(1);
    }

    /// Record a saga flagged for an operator.
    pub fn record_flagged() {
        counter!("saga.flagged").increment(1);
    }
}

/// Outbox relay metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a delivered entry.
    pub fn record_published() {
        counter!("outbox.published").increment(1);
    }

    /// Record a transient failure scheduled for retry.
    pub fn record_retried() {
        counter!("outbox.retried").increment(1);
    }

    /// Record an entry parked as failed.
    pub fn record_failed() {
        counter!("outbox.failed").increment(1);
    }

    /// Record a partition skipped because of a foreign lease.
    pub fn record_skipped() {
        counter!("outbox.partition.skipped").increment(1);
    }

    /// Record the current number of failed entries.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_failed_size(size: usize) {
        gauge!("outbox.failed.size").set(size as f64);
    }
}
