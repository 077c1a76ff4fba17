//! On-demand queries over stored snapshots, alert state and pricing.
//!
//! Nothing here collects metrics: every answer comes from what the monitor
//! cycle already wrote.

use crate::error::{ServiceError, ServiceResult};
use fw_alert::{AlertEngine, AlertRuleConfig, ChannelDelivery};
use fw_health::UptimeReport;
use fw_ledger::{CostReport, Forecast, PricingTable, forecast, period_cost};
use fw_observe::{CycleMetrics, MetricsExporter};
use fw_proto::{Alert, AlertRule, AssetType, HealthStatus, Severity, Snapshot, Timeframe, now_ms};
use fw_store::SharedSnapshotStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Uptime and current status of one asset.
pub type AssetHealth = UptimeReport;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

const DAY_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

// ─── Views ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSummary {
    pub id: String,
    pub project: String,
    pub status: HealthStatus,
    pub last_check: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
}

impl StatusCounts {
    fn add(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Down => self.down += 1,
        }
    }
}

/// Fleet overview built from each asset's latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub generated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub total: usize,
    pub counts: BTreeMap<AssetType, usize>,
    pub status: StatusCounts,
    pub assets: BTreeMap<AssetType, Vec<AssetSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertsView {
    pub active: Vec<Alert>,
    pub recent: Vec<Alert>,
}

// ─── Service ─────────────────────────────────────────────────────────────────

pub struct QueryService {
    store: SharedSnapshotStore,
    alerts: Arc<AlertEngine>,
    pricing: PricingTable,
    metrics: Arc<CycleMetrics>,
    forecast_period: Duration,
    stale_after: Duration,
    clock: Clock,
}

impl QueryService {
    pub fn new(
        store: SharedSnapshotStore,
        alerts: Arc<AlertEngine>,
        pricing: PricingTable,
        metrics: Arc<CycleMetrics>,
    ) -> Self {
        Self {
            store,
            alerts,
            pricing,
            metrics,
            forecast_period: Duration::from_secs(24 * 3600),
            stale_after: Duration::from_secs(2 * 300),
            clock: Arc::new(now_ms),
        }
    }

    pub fn with_forecast_period(mut self, period: Duration) -> Self {
        self.forecast_period = period;
        self
    }

    /// Assets whose last check trails the newest snapshot in the store by
    /// more than this are left out of the overview.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Replace the wall clock, for reproducible windows.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn get_overview(&self, project: Option<&str>) -> Overview {
        let mut overview = Overview {
            generated_at: self.now(),
            project: project.map(str::to_string),
            total: 0,
            counts: BTreeMap::new(),
            status: StatusCounts::default(),
            assets: BTreeMap::new(),
        };

        let mut latest = self.store.latest_all();
        let newest = latest.iter().map(|s| s.timestamp).max().unwrap_or(0);
        let stale = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = newest.saturating_sub(stale);
        latest.retain(|s| s.timestamp >= cutoff && project.is_none_or(|p| s.project == p));
        latest.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

        for snap in latest {
            overview.total += 1;
            overview.status.add(snap.status);
            *overview.counts.entry(snap.asset_type).or_insert(0) += 1;
            overview.assets.entry(snap.asset_type).or_default().push(AssetSummary {
                id: snap.asset_id,
                project: snap.project,
                status: snap.status,
                last_check: snap.timestamp,
                error: snap.error,
            });
        }
        overview
    }

    pub fn get_asset_health(&self, asset_id: &str) -> ServiceResult<AssetHealth> {
        let series = self.store.history(asset_id, usize::MAX);
        UptimeReport::from_series(&series, self.now()).ok_or_else(|| ServiceError::NotFound(format!("asset '{asset_id}'")))
    }

    /// Up to `limit` most recent snapshots, oldest first.
    pub fn get_history(&self, asset_id: &str, limit: usize) -> ServiceResult<Vec<Snapshot>> {
        let history = self.store.history(asset_id, limit);
        if history.is_empty() {
            return Err(ServiceError::NotFound(format!("asset '{asset_id}'")));
        }
        Ok(history)
    }

    pub fn get_costs(&self, timeframe: Timeframe) -> CostReport {
        let now = self.now();
        let snapshots = self.store.range_all(timeframe.since(now), now.saturating_add(1));
        CostReport::build(timeframe, &snapshots, &self.pricing)
    }

    /// Compare the latest forecast period with the one before it.
    pub fn get_forecast(&self) -> Forecast {
        let now = self.now();
        let period = i64::try_from(self.forecast_period.as_millis()).unwrap_or(i64::MAX);
        let days = period as f64 / DAY_MS;
        let split = now.saturating_sub(period);

        let current = self.store.range_all(split, now.saturating_add(1));
        let previous = self.store.range_all(split.saturating_sub(period), split);
        forecast(
            period_cost(&current, days, &self.pricing),
            period_cost(&previous, days, &self.pricing),
        )
    }

    pub fn get_alerts(&self, timeframe: Timeframe, severity: Option<Severity>) -> AlertsView {
        AlertsView {
            active: self.alerts.active(),
            recent: self.alerts.recent(timeframe.since(self.now()), severity),
        }
    }

    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.alerts.rules()
    }

    pub fn set_alert_rule(&self, config: &AlertRuleConfig) -> ServiceResult<AlertRule> {
        let rule = self.alerts.set_rule(config)?;
        info!(rule = %rule.id, metric = %rule.metric, "alert rule saved");
        Ok(rule)
    }

    pub fn remove_alert_rule(&self, id: &str) -> ServiceResult<()> {
        if self.alerts.remove_rule(id) {
            info!(rule = %id, "alert rule removed");
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("alert rule '{id}'")))
        }
    }

    pub async fn test_alert(&self) -> Vec<ChannelDelivery> {
        self.alerts.test_alert().await
    }

    pub fn metrics_text(&self) -> String {
        MetricsExporter::new(self.metrics.clone()).render()
    }

    pub fn flush(&self) -> ServiceResult<()> {
        self.store.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_proto::{MetricKey, Metrics};
    use fw_store::SnapshotStore;

    const NOW: i64 = 1_700_000_000_000;
    const HOUR: i64 = 3_600_000;

    fn snap(id: &str, asset_type: AssetType, project: &str, ts: i64, status: HealthStatus) -> Snapshot {
        Snapshot {
            asset_id: id.to_string(),
            asset_type,
            project: project.to_string(),
            timestamp: ts,
            metrics: Metrics::new(),
            status,
            error: None,
        }
    }

    fn service(store: SharedSnapshotStore) -> QueryService {
        QueryService::new(
            store,
            Arc::new(AlertEngine::default()),
            PricingTable::default(),
            Arc::new(CycleMetrics::new()),
        )
        .with_clock(|| NOW)
    }

    #[test]
    fn test_overview_groups_by_type_and_filters_project() {
        let store = Arc::new(SnapshotStore::new());
        store.put(snap("shop-api", AssetType::Function, "shop", NOW, HealthStatus::Healthy));
        store.put(snap("blog-render", AssetType::Function, "blog", NOW, HealthStatus::Degraded));
        store.put(snap("shop-assets", AssetType::Bucket, "shop", NOW, HealthStatus::Down));
        let svc = service(store);

        let all = svc.get_overview(None);
        assert_eq!(all.total, 3);
        assert_eq!(all.counts.get(&AssetType::Function), Some(&2));
        assert_eq!(all.counts.get(&AssetType::Bucket), Some(&1));
        assert_eq!(all.status, StatusCounts { healthy: 1, degraded: 1, down: 1 });

        let shop = svc.get_overview(Some("shop"));
        assert_eq!(shop.total, 2);
        assert_eq!(shop.counts.get(&AssetType::Function), Some(&1));
        assert_eq!(shop.assets[&AssetType::Function][0].id, "shop-api");
    }

    #[test]
    fn test_overview_uses_latest_snapshot() {
        let store = Arc::new(SnapshotStore::new());
        store.put(snap("shop-api", AssetType::Function, "shop", NOW - HOUR, HealthStatus::Down));
        store.put(snap("shop-api", AssetType::Function, "shop", NOW, HealthStatus::Healthy));
        let overview = service(store).get_overview(None);
        assert_eq!(overview.status.healthy, 1);
        assert_eq!(overview.assets[&AssetType::Function][0].last_check, NOW);
    }

    #[test]
    fn test_overview_omits_assets_missing_from_recent_ticks() {
        let store = Arc::new(SnapshotStore::new());
        store.put(snap("gone", AssetType::Function, "shop", NOW - 2 * HOUR, HealthStatus::Down));
        store.put(snap("live", AssetType::Function, "shop", NOW, HealthStatus::Healthy));
        store.put(snap("late", AssetType::Bucket, "shop", NOW - 300_000, HealthStatus::Healthy));

        let overview = service(store.clone()).get_overview(None);
        assert_eq!(overview.total, 2);
        let ids: Vec<&str> = overview.assets.values().flatten().map(|a| a.id.as_str()).collect();
        assert!(!ids.contains(&"gone"));

        let wide = service(store).with_stale_after(Duration::from_secs(3 * 3600)).get_overview(None);
        assert_eq!(wide.total, 3);
    }

    #[test]
    fn test_asset_health_and_not_found() {
        let store = Arc::new(SnapshotStore::new());
        store.put(snap("db-1", AssetType::RelationalDb, "shop", NOW - 2 * HOUR, HealthStatus::Down));
        store.put(snap("db-1", AssetType::RelationalDb, "shop", NOW - HOUR, HealthStatus::Healthy));
        let svc = service(store);

        let health = svc.get_asset_health("db-1").expect("health");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.uptime_24h, 50.0);
        assert_eq!(health.last_check, NOW - HOUR);

        assert!(matches!(svc.get_asset_health("nope"), Err(ServiceError::NotFound(_))));
        assert!(matches!(svc.get_history("nope", 10), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_history_limit() {
        let store = Arc::new(SnapshotStore::new());
        for i in 0..5 {
            store.put(snap("kv-1", AssetType::KvNamespace, "shop", NOW - i * HOUR, HealthStatus::Healthy));
        }
        let history = service(store).get_history("kv-1", 2).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].timestamp, NOW);
    }

    #[test]
    fn test_costs_only_count_timeframe() {
        let store = Arc::new(SnapshotStore::new());
        let mut inside = snap("shop-api", AssetType::Function, "shop", NOW - HOUR / 2, HealthStatus::Healthy);
        inside.metrics = Metrics::new().with(MetricKey::Requests, 20_000_000.0);
        let mut outside = snap("shop-api", AssetType::Function, "shop", NOW - 2 * HOUR, HealthStatus::Healthy);
        outside.metrics = Metrics::new().with(MetricKey::Requests, 50_000_000.0);
        store.put(inside);
        store.put(outside);

        let svc = service(store);
        let hour = svc.get_costs(Timeframe::Hour);
        let day = svc.get_costs(Timeframe::Day);
        assert!(hour.total > 0.0);
        assert!(day.total > hour.total);
        assert_eq!(hour.currency, "USD");
    }

    #[test]
    fn test_forecast_without_data_is_flat() {
        let f = service(Arc::new(SnapshotStore::new())).get_forecast();
        assert_eq!(f.current, 0.0);
        assert_eq!(f.trend, 1.0);
        assert_eq!(f.trend_percent, 0.0);
    }

    #[test]
    fn test_alert_rule_management() {
        let svc = service(Arc::new(SnapshotStore::new()));
        let config: AlertRuleConfig = serde_json::from_value(serde_json::json!({
            "id": "kv-writes",
            "metric": "writeOps",
            "condition": "gt",
            "threshold": 1000.0
        }))
        .expect("config");

        let rule = svc.set_alert_rule(&config).expect("valid rule");
        assert_eq!(rule.metric, MetricKey::WriteOps);
        assert_eq!(svc.alert_rules().len(), 4);

        svc.remove_alert_rule("kv-writes").expect("removed");
        assert!(matches!(svc.remove_alert_rule("kv-writes"), Err(ServiceError::NotFound(_))));

        let bad = AlertRuleConfig {
            id: "x".to_string(),
            metric: "bogus".to_string(),
            ..config
        };
        assert!(matches!(svc.set_alert_rule(&bad), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_metrics_text() {
        let text = service(Arc::new(SnapshotStore::new())).metrics_text();
        assert!(text.contains("fleetwatch_cycles_total 0"));
    }
}
