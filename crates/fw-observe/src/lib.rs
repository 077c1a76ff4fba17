//! Self-observability for the FleetWatch monitor.
//!
//! [`CycleMetrics`] counts what each monitoring cycle did; [`MetricsExporter`]
//! renders those counters in Prometheus text format.

#![forbid(unsafe_code)]

use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

// ─── Counter ─────────────────────────────────────────────────────────────────

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A thread-safe u64 value that can go up or down.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ─── Cycle metrics ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CycleMetrics {
    /// Monitoring cycles completed (including partially failed ones).
    pub cycles_total: Counter,
    /// Cycles abandoned because of shutdown.
    pub cycles_cancelled: Counter,
    /// Asset types whose discovery failed.
    pub discovery_errors: Counter,
    /// Assets whose collection failed.
    pub collection_errors: Counter,
    pub snapshots_written: Counter,
    pub snapshots_pruned: Counter,
    pub alerts_fired: Counter,
    pub alerts_resolved: Counter,
    pub notification_failures: Counter,
    pub store_flush_errors: Counter,
    /// Assets found by the most recent discovery pass.
    pub assets_discovered: Gauge,
    /// Wall time of the most recent cycle.
    pub last_cycle_duration_ms: Gauge,
}

/// Point-in-time copy of [`CycleMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleMetricsSnapshot {
    pub cycles_total: u64,
    pub cycles_cancelled: u64,
    pub discovery_errors: u64,
    pub collection_errors: u64,
    pub snapshots_written: u64,
    pub snapshots_pruned: u64,
    pub alerts_fired: u64,
    pub alerts_resolved: u64,
    pub notification_failures: u64,
    pub store_flush_errors: u64,
    pub assets_discovered: u64,
    pub last_cycle_duration_ms: u64,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_notification_failures(&self, n: u64) {
        if n > 0 {
            self.notification_failures.add(n);
            warn!(
                counter = "notification_failures",
                value = self.notification_failures.get(),
                "alert notifications failed"
            );
        }
    }

    pub fn snapshot(&self) -> CycleMetricsSnapshot {
        CycleMetricsSnapshot {
            cycles_total: self.cycles_total.get(),
            cycles_cancelled: self.cycles_cancelled.get(),
            discovery_errors: self.discovery_errors.get(),
            collection_errors: self.collection_errors.get(),
            snapshots_written: self.snapshots_written.get(),
            snapshots_pruned: self.snapshots_pruned.get(),
            alerts_fired: self.alerts_fired.get(),
            alerts_resolved: self.alerts_resolved.get(),
            notification_failures: self.notification_failures.get(),
            store_flush_errors: self.store_flush_errors.get(),
            assets_discovered: self.assets_discovered.get(),
            last_cycle_duration_ms: self.last_cycle_duration_ms.get(),
        }
    }
}

// ─── Prometheus export ───────────────────────────────────────────────────────

enum Kind {
    Counter,
    Gauge,
}

/// Renders [`CycleMetrics`] in Prometheus text format.
pub struct MetricsExporter {
    metrics: Arc<CycleMetrics>,
    prefix: String,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<CycleMetrics>) -> Self {
        Self::with_prefix(metrics, "fleetwatch")
    }

    pub fn with_prefix(metrics: Arc<CycleMetrics>, prefix: impl Into<String>) -> Self {
        Self {
            metrics,
            prefix: prefix.into(),
        }
    }

    pub fn render(&self) -> String {
        let s = self.metrics.snapshot();
        let rows = [
            ("cycles_total", "Monitoring cycles completed", Kind::Counter, s.cycles_total),
            ("cycles_cancelled_total", "Monitoring cycles cancelled by shutdown", Kind::Counter, s.cycles_cancelled),
            ("discovery_errors_total", "Asset types whose discovery failed", Kind::Counter, s.discovery_errors),
            ("collection_errors_total", "Assets whose metrics collection failed", Kind::Counter, s.collection_errors),
            ("snapshots_written_total", "Snapshots written to the store", Kind::Counter, s.snapshots_written),
            ("snapshots_pruned_total", "Snapshots removed by retention", Kind::Counter, s.snapshots_pruned),
            ("alerts_fired_total", "Alerts fired", Kind::Counter, s.alerts_fired),
            ("alerts_resolved_total", "Alerts resolved", Kind::Counter, s.alerts_resolved),
            ("notification_failures_total", "Alert notifications that failed to deliver", Kind::Counter, s.notification_failures),
            ("store_flush_errors_total", "Failed snapshot store flushes", Kind::Counter, s.store_flush_errors),
            ("assets_discovered", "Assets found by the last discovery pass", Kind::Gauge, s.assets_discovered),
            ("last_cycle_duration_ms", "Duration of the last monitoring cycle", Kind::Gauge, s.last_cycle_duration_ms),
        ];

        let mut out = String::new();
        for (name, help, kind, value) in rows {
            let kind = match kind {
                Kind::Counter => "counter",
                Kind::Gauge => "gauge",
            };
            let p = &self.prefix;
            let _ = writeln!(out, "# HELP {p}_{name} {help}");
            let _ = writeln!(out, "# TYPE {p}_{name} {kind}");
            let _ = writeln!(out, "{p}_{name} {value}");
        }
        out
    }
}
