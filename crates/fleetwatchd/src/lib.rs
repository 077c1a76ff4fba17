//! fleetwatchd: FleetWatch monitor daemon
//!
//! Wires discovery, collection, the snapshot store, health evaluation,
//! alerting and cost estimation into a periodic [`Monitor`] plus an
//! on-demand [`QueryService`].

#![forbid(unsafe_code)]

pub mod commands;
pub mod config;
pub mod error;
pub mod monitor;
pub mod service;

use fw_alert::{AlertEngine, Dispatcher};
use fw_collector::MetricsCollector;
use fw_discovery::{DiscoveryClient, HttpPlatformClient, PlatformClient};
use fw_observe::CycleMetrics;
use fw_store::{SharedSnapshotStore, SnapshotStore};
use std::sync::Arc;
use tracing::info;

pub use commands::{CommandError, CommandRequest, handle_command};
pub use config::MonitorConfig;
pub use error::{DaemonError, DaemonResult, ServiceError, ServiceResult};
pub use monitor::{CycleReport, Monitor};
pub use service::QueryService;

// ─── Daemon ──────────────────────────────────────────────────────────────────

/// A monitor and the query service reading the state it writes.
pub struct Daemon {
    pub monitor: Monitor,
    pub service: QueryService,
}

impl Daemon {
    /// Build against an already-constructed platform client.
    pub fn new(config: &MonitorConfig, client: Arc<dyn PlatformClient>) -> DaemonResult<Self> {
        let timeout = config.request_timeout();
        let store = open_store(config);
        let metrics = Arc::new(CycleMetrics::new());

        let dispatcher = Dispatcher::from_webhooks(
            config.notifications.slack_webhook_url.as_deref(),
            config.notifications.discord_webhook_url.as_deref(),
            timeout,
        )?;
        let alerts = Arc::new(
            AlertEngine::new(config.alert_rules.clone(), dispatcher).with_max_history(config.max_alert_history),
        );
        info!(channels = ?alerts_channels(config), rules = config.alert_rules.len(), "alerting configured");

        let discovery = DiscoveryClient::new(client.clone(), &config.account_id)
            .with_presets(config.project_presets.clone())
            .with_call_timeout(timeout);
        let collector = MetricsCollector::new(client, &config.account_id)
            .with_call_timeout(timeout)
            .with_max_concurrency(config.max_concurrency);

        let monitor = Monitor::new(discovery, collector, store.clone(), alerts.clone())
            .with_policy(config.health_policy.clone())
            .with_metrics(metrics.clone())
            .with_interval(config.interval())
            .with_retention(config.retention_per_asset);

        let service = QueryService::new(store, alerts, config.pricing.clone(), metrics)
            .with_forecast_period(config.forecast_period())
            .with_stale_after(config.interval() * 2);

        Ok(Self { monitor, service })
    }

    /// Build with an HTTP client for the configured API.
    pub fn connect(config: &MonitorConfig) -> DaemonResult<Self> {
        let (_, token) = config.credentials()?;
        let client = HttpPlatformClient::new(&config.api_base_url, token, config.request_timeout())?;
        Self::new(config, Arc::new(client))
    }
}

/// The snapshot store described by `config`: persisted when a state path is set.
pub fn open_store(config: &MonitorConfig) -> SharedSnapshotStore {
    match &config.state_path {
        Some(path) => Arc::new(SnapshotStore::open(path)),
        None => Arc::new(SnapshotStore::new()),
    }
}

/// A query service over persisted snapshots only, for one-shot commands.
/// Alert history lives in the running daemon and starts empty here.
pub fn offline_service(config: &MonitorConfig) -> QueryService {
    let alerts = Arc::new(
        AlertEngine::new(config.alert_rules.clone(), Dispatcher::new(config.request_timeout()))
            .with_max_history(config.max_alert_history),
    );
    QueryService::new(
        open_store(config),
        alerts,
        config.pricing.clone(),
        Arc::new(CycleMetrics::new()),
    )
    .with_forecast_period(config.forecast_period())
    .with_stale_after(config.interval() * 2)
}

fn alerts_channels(config: &MonitorConfig) -> Vec<&'static str> {
    let mut channels = vec!["log"];
    if config.notifications.slack_webhook_url.is_some() {
        channels.push("slack");
    }
    if config.notifications.discord_webhook_url.is_some() {
        channels.push("discord");
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_discovery::MockPlatform;
    use fw_proto::{AssetType, HealthStatus, Metrics, Snapshot};

    #[test]
    fn test_daemon_shares_store_between_monitor_and_service() {
        let config = MonitorConfig {
            account_id: "acc".to_string(),
            ..MonitorConfig::default()
        };
        let daemon = Daemon::new(&config, Arc::new(MockPlatform::new())).expect("daemon");

        daemon.monitor.store().put(Snapshot {
            asset_id: "shop-api".to_string(),
            asset_type: AssetType::Function,
            project: "shop".to_string(),
            timestamp: 1,
            metrics: Metrics::new(),
            status: HealthStatus::Healthy,
            error: None,
        });
        assert_eq!(daemon.service.get_overview(None).total, 1);
    }

    #[test]
    fn test_connect_requires_credentials() {
        let err = Daemon::connect(&MonitorConfig::default()).err().expect("missing credentials");
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn test_offline_service_reads_persisted_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = MonitorConfig {
            state_path: Some(dir.path().to_path_buf()),
            ..MonitorConfig::default()
        };

        let store = open_store(&config);
        store.put(Snapshot {
            asset_id: "db-1".to_string(),
            asset_type: AssetType::RelationalDb,
            project: "shop".to_string(),
            timestamp: 5,
            metrics: Metrics::new(),
            status: HealthStatus::Down,
            error: Some("timeout".to_string()),
        });
        store.flush().expect("flush");

        let svc = offline_service(&config);
        let history = svc.get_history("db-1", 10).expect("history");
        assert_eq!(history[0].status, HealthStatus::Down);
    }
}
