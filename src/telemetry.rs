//! Prometheus Telemetry
//!
//! Counters for the network client and the offline queue, registered in a
//! registry owned by the layer so several layers can live in one process.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Queue lifecycle events counted by `resilience_queue_operations_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued,
    Synced,
    Failed,
    Retried,
}

impl QueueEvent {
    fn as_label(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued => "enqueued",
            QueueEvent::Synced => "synced",
            QueueEvent::Failed => "failed",
            QueueEvent::Retried => "retried",
        }
    }
}

/// Metric handles plus the registry they live in
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    http_requests: IntCounterVec,
    http_retries: IntCounter,
    token_refresh: IntCounterVec,
    queue_operations: IntCounterVec,
    queue_pending: IntGauge,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new(
                "resilience_http_requests_total",
                "HTTP requests by method and final outcome",
            ),
            &["method", "outcome"],
        )
        .map_err(metrics_error)?;
        let http_retries = IntCounter::new(
            "resilience_http_retries_total",
            "In-place retries after a transient failure",
        )
        .map_err(metrics_error)?;
        let token_refresh = IntCounterVec::new(
            Opts::new("resilience_token_refresh_total", "Token refresh attempts"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let queue_operations = IntCounterVec::new(
            Opts::new(
                "resilience_queue_operations_total",
                "Offline queue operation lifecycle events",
            ),
            &["event"],
        )
        .map_err(metrics_error)?;
        let queue_pending = IntGauge::new(
            "resilience_queue_pending",
            "Operations waiting in the offline queue",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(http_requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(http_retries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(token_refresh.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(queue_operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(queue_pending.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            http_requests,
            http_retries,
            token_refresh,
            queue_operations,
            queue_pending,
        })
    }

    pub fn record_request(&self, method: &str, outcome: &str) {
        self.http_requests
            .with_label_values(&[method, outcome])
            .inc();
    }

    pub fn record_retry(&self) {
        self.http_retries.inc();
    }

    pub fn record_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.token_refresh.with_label_values(&[outcome]).inc();
    }

    pub fn record_queue(&self, event: QueueEvent) {
        self.queue_operations
            .with_label_values(&[event.as_label()])
            .inc();
    }

    pub fn set_queue_pending(&self, pending: u64) {
        self.queue_pending.set(pending as i64);
    }

    /// Number of requests recorded for a method/outcome pair
    pub fn requests(&self, method: &str, outcome: &str) -> u64 {
        self.http_requests
            .with_label_values(&[method, outcome])
            .get()
    }

    pub fn retries(&self) -> u64 {
        self.http_retries.get()
    }

    pub fn refreshes(&self, success: bool) -> u64 {
        let outcome = if success { "success" } else { "failure" };
        self.token_refresh.with_label_values(&[outcome]).get()
    }

    pub fn queue_events(&self, event: QueueEvent) -> u64 {
        self.queue_operations
            .with_label_values(&[event.as_label()])
            .get()
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
