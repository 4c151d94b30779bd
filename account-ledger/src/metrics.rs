//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation,outcome}` - Completed operations
//! - `ledger_cas_conflicts_total` - Compare-and-set version conflicts
//! - `ledger_retries_exhausted_total` - Operations that ran out of attempts
//! - `ledger_compensations_total{result}` - Transfer reversals
//! - `ledger_operation_duration_seconds{operation}` - Operation latency

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Completed operations by kind and outcome
    pub operations_total: IntCounterVec,

    /// CAS version conflicts
    pub cas_conflicts: IntCounter,

    /// Retry budgets exhausted
    pub retries_exhausted: IntCounter,

    /// Transfer compensations by result
    pub compensations: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("cas_conflicts", &self.cas_conflicts.get())
            .field("retries_exhausted", &self.retries_exhausted.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Completed ledger operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let cas_conflicts = IntCounter::new(
            "ledger_cas_conflicts_total",
            "Compare-and-set version conflicts",
        )?;
        registry.register(Box::new(cas_conflicts.clone()))?;

        let retries_exhausted = IntCounter::new(
            "ledger_retries_exhausted_total",
            "Operations that exhausted their retry budget",
        )?;
        registry.register(Box::new(retries_exhausted.clone()))?;

        let compensations = IntCounterVec::new(
            Opts::new("ledger_compensations_total", "Transfer debit reversals"),
            &["result"],
        )?;
        registry.register(Box::new(compensations.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of operation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            operations_total,
            cas_conflicts,
            retries_exhausted,
            compensations,
            operation_duration,
            registry,
        })
    }

    /// Record a finished operation
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_seconds: f64) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a CAS conflict
    pub fn record_conflict(&self) {
        self.cas_conflicts.inc();
    }

    /// Record an exhausted retry budget
    pub fn record_exhausted(&self) {
        self.retries_exhausted.inc();
    }

    /// Record a transfer reversal (`reversed` or `unreconciled`)
    pub fn record_compensation(&self, result: &str) {
        self.compensations.with_label_values(&[result]).inc();
    }

    /// Operations counted for `operation` with `outcome`
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
