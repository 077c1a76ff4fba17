//! Command dispatch for FleetWatch queries
//!
//! Maps named commands with JSON params onto the [`QueryService`]. Used by
//! `fleetwatchd exec` and by anything embedding the daemon.

use crate::service::QueryService;
use fw_alert::AlertRuleConfig;
use fw_proto::{Severity, Timeframe};
use serde_json::{Value, json};
use tracing::debug;

/// Named command with JSON params
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub params: Value,
}

impl CommandRequest {
    pub fn new(command: &str, params: Value) -> Self {
        Self {
            command: command.to_string(),
            params,
        }
    }
}

/// Command error type
pub type CommandError = Box<dyn std::error::Error + Send + Sync>;

/// Commands understood by [`handle_command`].
pub const COMMANDS: [&str; 11] = [
    "overview",
    "asset.health",
    "asset.history",
    "costs",
    "forecast",
    "alerts",
    "alert.rules",
    "alert.set_rule",
    "alert.remove_rule",
    "alert.test",
    "metrics",
];

const DEFAULT_HISTORY_LIMIT: usize = 100;

pub async fn handle_command(service: &QueryService, request: CommandRequest) -> Result<Value, CommandError> {
    debug!(command = %request.command, "handling command");
    let params = &request.params;

    match request.command.as_str() {
        // ── Fleet ─────────────────────────────────────────────────────────
        "overview" => {
            let project = optional_str(params, "project");
            Ok(serde_json::to_value(service.get_overview(project))?)
        }

        // ── Assets ────────────────────────────────────────────────────────
        "asset.health" => {
            let id = required_str(params, "asset_id")?;
            Ok(serde_json::to_value(service.get_asset_health(id)?)?)
        }
        "asset.history" => {
            let id = required_str(params, "asset_id")?;
            let limit = params
                .get("limit")
                .and_then(|v| v.as_u64())
                .map_or(DEFAULT_HISTORY_LIMIT, |n| usize::try_from(n).unwrap_or(usize::MAX));
            let history = service.get_history(id, limit)?;
            Ok(json!({ "asset_id": id, "count": history.len(), "snapshots": history }))
        }

        // ── Costs ─────────────────────────────────────────────────────────
        "costs" => {
            let timeframe = timeframe_param(params, Timeframe::Month)?;
            Ok(serde_json::to_value(service.get_costs(timeframe))?)
        }
        "forecast" => Ok(serde_json::to_value(service.get_forecast())?),

        // ── Alerts ────────────────────────────────────────────────────────
        "alerts" => {
            let timeframe = timeframe_param(params, Timeframe::Day)?;
            let severity = optional_str(params, "severity")
                .map(str::parse::<Severity>)
                .transpose()?;
            Ok(serde_json::to_value(service.get_alerts(timeframe, severity))?)
        }
        "alert.rules" => Ok(json!({ "rules": service.alert_rules() })),
        "alert.set_rule" => {
            let config: AlertRuleConfig = serde_json::from_value(params.clone())?;
            let rule = service.set_alert_rule(&config)?;
            Ok(json!({ "ok": true, "rule": rule }))
        }
        "alert.remove_rule" => {
            let id = required_str(params, "id")?;
            service.remove_alert_rule(id)?;
            Ok(json!({ "ok": true, "removed": id }))
        }
        "alert.test" => {
            let deliveries = service.test_alert().await;
            let ok = deliveries.iter().all(|d| d.delivered);
            Ok(json!({ "ok": ok, "deliveries": deliveries }))
        }

        // ── Self ──────────────────────────────────────────────────────────
        "metrics" => Ok(json!({ "format": "prometheus", "text": service.metrics_text() })),

        unknown => Err(format!("unknown command: {unknown}").into()),
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, CommandError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing '{key}'").into())
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

fn timeframe_param(params: &Value, default: Timeframe) -> Result<Timeframe, CommandError> {
    Ok(optional_str(params, "timeframe")
        .map(str::parse::<Timeframe>)
        .transpose()?
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_alert::AlertEngine;
    use fw_ledger::PricingTable;
    use fw_observe::CycleMetrics;
    use fw_proto::{AssetType, HealthStatus, Metrics, Snapshot};
    use fw_store::SnapshotStore;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn service() -> QueryService {
        let store = Arc::new(SnapshotStore::new());
        store.put(Snapshot {
            asset_id: "shop-api".to_string(),
            asset_type: AssetType::Function,
            project: "shop".to_string(),
            timestamp: NOW,
            metrics: Metrics::new(),
            status: HealthStatus::Healthy,
            error: None,
        });
        QueryService::new(
            store,
            Arc::new(AlertEngine::default()),
            PricingTable::default(),
            Arc::new(CycleMetrics::new()),
        )
        .with_clock(|| NOW)
    }

    async fn run(svc: &QueryService, command: &str, params: Value) -> Result<Value, CommandError> {
        handle_command(svc, CommandRequest::new(command, params)).await
    }

    #[tokio::test]
    async fn test_overview_command() {
        let svc = service();
        let out = run(&svc, "overview", json!({})).await.expect("overview");
        assert_eq!(out["total"], 1);
        assert_eq!(out["counts"]["function"], 1);
        assert_eq!(out["assets"]["function"][0]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_asset_commands() {
        let svc = service();
        let health = run(&svc, "asset.health", json!({"asset_id": "shop-api"}))
            .await
            .expect("health");
        assert_eq!(health["uptime_24h"], 100.0);

        let history = run(&svc, "asset.history", json!({"asset_id": "shop-api", "limit": 5}))
            .await
            .expect("history");
        assert_eq!(history["count"], 1);

        let err = run(&svc, "asset.health", json!({})).await.expect_err("missing id");
        assert_eq!(err.to_string(), "missing 'asset_id'");

        let err = run(&svc, "asset.health", json!({"asset_id": "nope"}))
            .await
            .expect_err("unknown asset");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_costs_rejects_bad_timeframe() {
        let svc = service();
        let out = run(&svc, "costs", json!({"timeframe": "7d"})).await.expect("costs");
        assert_eq!(out["timeframe"], "7d");
        assert!(run(&svc, "costs", json!({"timeframe": "fortnight"})).await.is_err());
    }

    #[tokio::test]
    async fn test_alert_rule_commands() {
        let svc = service();
        let set = run(
            &svc,
            "alert.set_rule",
            json!({"id": "db-rows", "metric": "rowCount", "condition": "gt", "threshold": 1e6}),
        )
        .await
        .expect("set rule");
        assert_eq!(set["rule"]["id"], "db-rows");

        let rules = run(&svc, "alert.rules", json!({})).await.expect("rules");
        assert_eq!(rules["rules"].as_array().map(Vec::len), Some(4));

        run(&svc, "alert.remove_rule", json!({"id": "db-rows"}))
            .await
            .expect("remove");

        let bad = run(&svc, "alert.set_rule", json!({"id": "x", "metric": "rowCount", "condition": "gt"})).await;
        assert!(bad.is_err(), "missing threshold must be rejected");
    }

    #[tokio::test]
    async fn test_alerts_and_test_alert() {
        let svc = service();
        let alerts = run(&svc, "alerts", json!({"timeframe": "1h", "severity": "critical"}))
            .await
            .expect("alerts");
        assert_eq!(alerts["active"], json!([]));

        let test = run(&svc, "alert.test", json!({})).await.expect("test");
        assert_eq!(test["ok"], true);
        assert_eq!(test["deliveries"][0]["channel"], "log");
    }

    #[tokio::test]
    async fn test_metrics_and_unknown() {
        let svc = service();
        let out = run(&svc, "metrics", json!({})).await.expect("metrics");
        assert!(out["text"].as_str().is_some_and(|t| t.contains("fleetwatch_cycles_total")));

        let err = run(&svc, "vps.restart", json!({})).await.expect_err("unknown");
        assert_eq!(err.to_string(), "unknown command: vps.restart");
    }
}
