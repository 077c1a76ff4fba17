//! Monitoring cycle: discovery, collection, snapshot writes, health and alerts.

use fw_alert::{AlertEngine, Fired};
use fw_collector::{CollectionWindow, MetricsCollector};
use fw_discovery::{DiscoveryClient, DiscoveryReport};
use fw_health::HealthPolicy;
use fw_observe::CycleMetrics;
use fw_proto::{AssetType, Snapshot, now_ms};
use fw_store::SharedSnapshotStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Summary of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub tick: i64,
    pub assets: usize,
    pub discovery_errors: usize,
    pub collection_errors: usize,
    pub snapshots_written: usize,
    pub snapshots_pruned: usize,
    pub assets_retired: usize,
    pub alerts_fired: usize,
    pub alerts_resolved: usize,
    pub notification_failures: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Resolves once shutdown is requested. Pends forever if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct Monitor {
    discovery: DiscoveryClient,
    collector: MetricsCollector,
    store: SharedSnapshotStore,
    alerts: Arc<AlertEngine>,
    policy: HealthPolicy,
    metrics: Arc<CycleMetrics>,
    interval: Duration,
    retention: usize,
}

impl Monitor {
    pub fn new(
        discovery: DiscoveryClient,
        collector: MetricsCollector,
        store: SharedSnapshotStore,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self {
            discovery,
            collector,
            store,
            alerts,
            policy: HealthPolicy::default(),
            metrics: Arc::new(CycleMetrics::new()),
            interval: Duration::from_secs(300),
            retention: fw_store::DEFAULT_RETENTION,
        }
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CycleMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn store(&self) -> &SharedSnapshotStore {
        &self.store
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn metrics(&self) -> &Arc<CycleMetrics> {
        &self.metrics
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles every interval until shutdown is requested.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancelled(&mut shutdown) => break,
            }
            let report = self.run_cycle(now_ms(), &mut shutdown).await;
            if report.cancelled {
                break;
            }
        }

        if let Err(e) = self.store.flush() {
            self.metrics.store_flush_errors.inc();
            warn!(error = %e, "final snapshot flush failed");
        }
        info!("monitor stopped");
    }

    /// Run one full cycle for the tick at `tick_ms`. Failures are scoped to
    /// the asset or type they concern and end up in the report.
    pub async fn run_cycle(&self, tick_ms: i64, shutdown: &mut watch::Receiver<bool>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            tick: tick_ms,
            ..CycleReport::default()
        };

        let discovery = tokio::select! {
            d = self.discovery.discover_all() => d,
            _ = cancelled(shutdown) => return self.abandon(report, "discovery"),
        };
        report.assets = discovery.assets.len();
        report.discovery_errors = discovery.errors.len();
        self.metrics.assets_discovered.set(report.assets as u64);
        self.metrics.discovery_errors.add(report.discovery_errors as u64);

        let window = CollectionWindow::ending_at(tick_ms, self.interval);
        let collected = tokio::select! {
            c = self.collector.collect_all(&discovery.assets, &window) => c,
            _ = cancelled(shutdown) => return self.abandon(report, "collection"),
        };

        let mut snapshots = Vec::with_capacity(collected.len());
        for item in collected {
            let outcome = item.result.map_err(|e| e.to_string());
            if outcome.is_err() {
                report.collection_errors += 1;
            }
            let snapshot = self.policy.snapshot(&item.asset, tick_ms, outcome);
            if self.store.put(snapshot.clone()) {
                report.snapshots_written += 1;
            } else {
                debug!(asset = %snapshot.asset_id, tick = tick_ms, "snapshot already recorded");
            }
            report.snapshots_pruned += self.store.prune(&snapshot.asset_id, self.retention);
            snapshots.push(snapshot);
        }

        let lookback = self.alert_lookback_ms();
        let mut fired: Vec<Fired> = Vec::new();
        for snapshot in &snapshots {
            let history = self.store.range(&snapshot.asset_id, tick_ms.saturating_sub(lookback));
            let outcome = self.alerts.process(snapshot, &history);
            report.alerts_resolved += outcome.resolved.len();
            fired.extend(outcome.fired);
        }
        self.retire_vanished(&discovery, tick_ms, &mut report);
        report.alerts_fired = fired.len();
        report.notification_failures = self.alerts.notify(&fired).await;

        if let Err(e) = self.store.flush() {
            self.metrics.store_flush_errors.inc();
            warn!(error = %e, "snapshot flush failed");
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record(&report);
        info!(
            tick = tick_ms,
            assets = report.assets,
            snapshots = report.snapshots_written,
            discovery_errors = report.discovery_errors,
            collection_errors = report.collection_errors,
            alerts_fired = report.alerts_fired,
            alerts_resolved = report.alerts_resolved,
            assets_retired = report.assets_retired,
            duration_ms = report.duration_ms,
            "monitoring cycle complete"
        );
        report
    }

    /// Drop stored series and open alerts of assets discovery no longer
    /// reports. Types whose discovery failed this tick are left alone.
    fn retire_vanished(&self, discovery: &DiscoveryReport, tick_ms: i64, report: &mut CycleReport) {
        let failed: HashSet<AssetType> = discovery.errors.iter().map(|e| e.asset_type()).collect();
        let current: HashSet<&str> = discovery.assets.iter().map(|a| a.id.as_str()).collect();

        for snapshot in self.store.latest_all() {
            if current.contains(snapshot.asset_id.as_str()) || failed.contains(&snapshot.asset_type) {
                continue;
            }
            let removed = self.store.remove(&snapshot.asset_id);
            let resolved = self.alerts.retire_asset(&snapshot.asset_id, tick_ms);
            info!(
                asset = %snapshot.asset_id,
                asset_type = %snapshot.asset_type,
                snapshots = removed,
                alerts_resolved = resolved.len(),
                "asset no longer discovered, retired"
            );
            report.assets_retired += 1;
            report.snapshots_pruned += removed;
            report.alerts_resolved += resolved.len();
        }
    }

    /// History needed to judge the longest sustained rule, plus one interval.
    fn alert_lookback_ms(&self) -> i64 {
        let sustained = self
            .alerts
            .rules()
            .iter()
            .map(|r| r.sustained_seconds)
            .max()
            .unwrap_or(0);
        let total = Duration::from_secs(sustained) + self.interval;
        i64::try_from(total.as_millis()).unwrap_or(i64::MAX)
    }

    fn abandon(&self, mut report: CycleReport, stage: &str) -> CycleReport {
        report.cancelled = true;
        self.metrics.cycles_cancelled.inc();
        info!(tick = report.tick, stage, "monitoring cycle cancelled by shutdown");
        report
    }

    fn record(&self, report: &CycleReport) {
        let m = &self.metrics;
        m.cycles_total.inc();
        m.collection_errors.add(report.collection_errors as u64);
        m.snapshots_written.add(report.snapshots_written as u64);
        m.snapshots_pruned.add(report.snapshots_pruned as u64);
        m.alerts_fired.add(report.alerts_fired as u64);
        m.alerts_resolved.add(report.alerts_resolved as u64);
        m.record_notification_failures(report.notification_failures as u64);
        m.last_cycle_duration_ms.set(report.duration_ms);
    }
}

/// Latest snapshots written by the cycle at `tick_ms`.
pub fn latest_for_tick(store: &SharedSnapshotStore, tick_ms: i64) -> Vec<Snapshot> {
    store
        .latest_all()
        .into_iter()
        .filter(|s| s.timestamp == tick_ms)
        .collect()
}
