//! Health classification for FleetWatch snapshots.
//!
//! A snapshot is `down` when collection failed, `degraded` when any
//! [`HealthPolicy`] condition matches its metrics, and `healthy` otherwise.

#![forbid(unsafe_code)]

use fw_proto::{Asset, AssetType, Condition, HealthStatus, MetricKey, Metrics, Snapshot, Timeframe};
use fw_store::uptime_within;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─── Health policy ───────────────────────────────────────────────────────────

/// One degradation condition, shaped like an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCondition {
    pub metric: MetricKey,
    pub condition: Condition,
    pub threshold: f64,
    /// Restrict the condition to these asset types; all types when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_types: Option<Vec<AssetType>>,
}

impl HealthCondition {
    pub fn new(metric: MetricKey, condition: Condition, threshold: f64) -> Self {
        Self {
            metric,
            condition,
            threshold,
            asset_types: None,
        }
    }

    pub fn for_types(mut self, types: &[AssetType]) -> Self {
        self.asset_types = Some(types.to_vec());
        self
    }

    pub fn applies_to(&self, asset_type: AssetType) -> bool {
        self.asset_types
            .as_ref()
            .is_none_or(|types| types.contains(&asset_type))
    }

    /// True when the metric is present and the condition holds.
    pub fn matches(&self, asset_type: AssetType, metrics: &Metrics) -> bool {
        self.applies_to(asset_type)
            && metrics
                .get(self.metric)
                .is_some_and(|v| self.condition.holds(v, self.threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthPolicy {
    pub conditions: Vec<HealthCondition>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            conditions: vec![
                HealthCondition::new(MetricKey::ErrorRate, Condition::GreaterThan, 0.05)
                    .for_types(&[AssetType::Function]),
                HealthCondition::new(MetricKey::LatencyMs, Condition::GreaterThan, 1000.0),
                HealthCondition::new(MetricKey::AvgQueryTimeMs, Condition::GreaterThan, 1000.0),
            ],
        }
    }
}

impl HealthPolicy {
    /// Conditions currently violated by `metrics`.
    pub fn violations(&self, asset_type: AssetType, metrics: &Metrics) -> Vec<&HealthCondition> {
        self.conditions
            .iter()
            .filter(|c| c.matches(asset_type, metrics))
            .collect()
    }

    pub fn classify(&self, asset_type: AssetType, metrics: &Metrics, collection_failed: bool) -> HealthStatus {
        if collection_failed {
            HealthStatus::Down
        } else if self.conditions.iter().any(|c| c.matches(asset_type, metrics)) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Build the snapshot for one collection outcome. A failed collection
    /// yields an empty `down` snapshot carrying the error message.
    pub fn snapshot(&self, asset: &Asset, timestamp: i64, outcome: Result<Metrics, String>) -> Snapshot {
        let (metrics, error) = match outcome {
            Ok(metrics) => (metrics, None),
            Err(e) => (Metrics::new(), Some(e)),
        };
        let status = self.classify(asset.asset_type, &metrics, error.is_some());
        if status == HealthStatus::Degraded {
            let reasons: Vec<String> = self
                .violations(asset.asset_type, &metrics)
                .iter()
                .map(|c| format!("{} {} {}", c.metric, c.condition.symbol(), c.threshold))
                .collect();
            debug!(asset = %asset.id, ?reasons, "asset degraded");
        }

        Snapshot {
            asset_id: asset.id.clone(),
            asset_type: asset.asset_type,
            project: asset.project.clone(),
            timestamp,
            metrics,
            status,
            error,
        }
    }
}

// ─── Uptime report ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeReport {
    pub status: HealthStatus,
    pub uptime_24h: f64,
    pub uptime_7d: f64,
    pub uptime_30d: f64,
    /// Timestamp of the latest snapshot.
    pub last_check: i64,
}

impl UptimeReport {
    /// Summarise an oldest-first series as of `now_ms`. `None` for an empty series.
    pub fn from_series(series: &[Snapshot], now_ms: i64) -> Option<Self> {
        let latest = series.iter().max_by_key(|s| s.timestamp)?;
        Some(Self {
            status: latest.status,
            uptime_24h: uptime_within(series, now_ms, Timeframe::Day.duration_ms()),
            uptime_7d: uptime_within(series, now_ms, Timeframe::Week.duration_ms()),
            uptime_30d: uptime_within(series, now_ms, Timeframe::Month.duration_ms()),
            last_check: latest.timestamp,
        })
    }
}
