//! Shared data model for FleetWatch.
//!
//! Defines the types that flow between discovery, collection, the snapshot
//! store, health evaluation, alerting and cost estimation.

#![forbid(unsafe_code)]

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Error returned when parsing one of the enumerated wire values fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ─── Asset types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetType {
    Function,
    Bucket,
    RelationalDb,
    KvNamespace,
    ActorNamespace,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::Function,
        AssetType::Bucket,
        AssetType::RelationalDb,
        AssetType::KvNamespace,
        AssetType::ActorNamespace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Bucket => "bucket",
            Self::RelationalDb => "relational-db",
            Self::KvNamespace => "kv-namespace",
            Self::ActorNamespace => "actor-namespace",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("asset type", s))
    }
}

// ─── Asset ───────────────────────────────────────────────────────────────────

/// A discovered platform resource. Re-derived on every discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ─── Health status ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

// ─── Metric keys ─────────────────────────────────────────────────────────────

/// How a metric behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Count over the collection window; sums across windows.
    Counter,
    /// Point-in-time level (storage, object counts).
    Gauge,
    /// Derived value (rates, latencies); never summed.
    Derived,
}

/// Every measure the collector knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKey {
    #[serde(rename = "requests")]
    Requests,
    #[serde(rename = "errors")]
    Errors,
    #[serde(rename = "errorRate")]
    ErrorRate,
    #[serde(rename = "cpuTimeMs")]
    CpuTimeMs,
    #[serde(rename = "latencyMs")]
    LatencyMs,
    #[serde(rename = "objectCount")]
    ObjectCount,
    #[serde(rename = "storageBytes")]
    StorageBytes,
    #[serde(rename = "classAOps")]
    ClassAOps,
    #[serde(rename = "classBOps")]
    ClassBOps,
    #[serde(rename = "totalQueries")]
    TotalQueries,
    #[serde(rename = "readQueries")]
    ReadQueries,
    #[serde(rename = "writeQueries")]
    WriteQueries,
    #[serde(rename = "avgQueryTimeMs")]
    AvgQueryTimeMs,
    #[serde(rename = "slowQueries")]
    SlowQueries,
    #[serde(rename = "rowCount")]
    RowCount,
    #[serde(rename = "readOps")]
    ReadOps,
    #[serde(rename = "writeOps")]
    WriteOps,
    #[serde(rename = "deleteOps")]
    DeleteOps,
    #[serde(rename = "listOps")]
    ListOps,
}

impl MetricKey {
    pub const ALL: [MetricKey; 19] = [
        MetricKey::Requests,
        MetricKey::Errors,
        MetricKey::ErrorRate,
        MetricKey::CpuTimeMs,
        MetricKey::LatencyMs,
        MetricKey::ObjectCount,
        MetricKey::StorageBytes,
        MetricKey::ClassAOps,
        MetricKey::ClassBOps,
        MetricKey::TotalQueries,
        MetricKey::ReadQueries,
        MetricKey::WriteQueries,
        MetricKey::AvgQueryTimeMs,
        MetricKey::SlowQueries,
        MetricKey::RowCount,
        MetricKey::ReadOps,
        MetricKey::WriteOps,
        MetricKey::DeleteOps,
        MetricKey::ListOps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Errors => "errors",
            Self::ErrorRate => "errorRate",
            Self::CpuTimeMs => "cpuTimeMs",
            Self::LatencyMs => "latencyMs",
            Self::ObjectCount => "objectCount",
            Self::StorageBytes => "storageBytes",
            Self::ClassAOps => "classAOps",
            Self::ClassBOps => "classBOps",
            Self::TotalQueries => "totalQueries",
            Self::ReadQueries => "readQueries",
            Self::WriteQueries => "writeQueries",
            Self::AvgQueryTimeMs => "avgQueryTimeMs",
            Self::SlowQueries => "slowQueries",
            Self::RowCount => "rowCount",
            Self::ReadOps => "readOps",
            Self::WriteOps => "writeOps",
            Self::DeleteOps => "deleteOps",
            Self::ListOps => "listOps",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::ErrorRate | Self::LatencyMs | Self::AvgQueryTimeMs => MetricKind::Derived,
            Self::ObjectCount | Self::StorageBytes | Self::RowCount => MetricKind::Gauge,
            _ => MetricKind::Counter,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("metric", s))
    }
}

// ─── Metrics map ─────────────────────────────────────────────────────────────

/// Named numeric measures for one asset at one instant, keyed by wire name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: MetricKey, value: f64) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: MetricKey, value: f64) {
        self.0.insert(key.as_str().to_string(), value);
    }

    pub fn get(&self, key: MetricKey) -> Option<f64> {
        self.0.get(key.as_str()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// `errors / (errors + requests)`, defined as 0 when nothing was observed.
pub fn error_rate(errors: f64, requests: f64) -> f64 {
    let total = errors + requests;
    if total <= 0.0 { 0.0 } else { errors / total }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One measurement of one asset. Unique per (asset_id, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub asset_id: String,
    pub asset_type: AssetType,
    pub project: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub metrics: Metrics,
    pub status: HealthStatus,
    /// Set when collection failed; the snapshot is then `down`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn value(&self, key: MetricKey) -> Option<f64> {
        self.metrics.get(key)
    }
}

// ─── Conditions & channels ───────────────────────────────────────────────────

/// Tolerance for `Condition::Equal`.
pub const EQUALITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "gt", alias = "greater_than", alias = "greater-than")]
    GreaterThan,
    #[serde(rename = "lt", alias = "less_than", alias = "less-than")]
    LessThan,
    #[serde(rename = "eq", alias = "equal")]
    Equal,
}

impl Condition {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::Equal => (value - threshold).abs() <= EQUALITY_EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equal => "==",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "gt"),
            Self::LessThan => write!(f, "lt"),
            Self::Equal => write!(f, "eq"),
        }
    }
}

impl FromStr for Condition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" | ">" | "greater_than" | "greater-than" => Ok(Self::GreaterThan),
            "lt" | "<" | "less_than" | "less-than" => Ok(Self::LessThan),
            "eq" | "==" | "equal" => Ok(Self::Equal),
            other => Err(ParseEnumError::new("condition", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Log,
    Slack,
    Discord,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 3] = [
        NotificationChannel::Log,
        NotificationChannel::Slack,
        NotificationChannel::Discord,
    ];
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Slack => write!(f, "slack"),
            Self::Discord => write!(f, "discord"),
        }
    }
}

impl FromStr for NotificationChannel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "slack" => Ok(Self::Slack),
            "discord" => Ok(Self::Discord),
            other => Err(ParseEnumError::new("notification channel", other)),
        }
    }
}

// ─── Alert rules ─────────────────────────────────────────────────────────────

/// Rule target matching every asset.
pub const ALL_ASSETS: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric: MetricKey,
    /// `"*"` for every asset, otherwise a single asset id.
    #[serde(default = "default_target")]
    pub target: String,
    pub condition: Condition,
    pub threshold: f64,
    /// 0 fires immediately.
    #[serde(default)]
    pub sustained_seconds: u64,
    #[serde(default = "default_channel")]
    pub channel: NotificationChannel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_target() -> String {
    ALL_ASSETS.to_string()
}

fn default_channel() -> NotificationChannel {
    NotificationChannel::Log
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn applies_to(&self, asset_id: &str) -> bool {
        self.enabled && (self.target == ALL_ASSETS || self.target == asset_id)
    }

    /// Rules installed when no configuration overrides them.
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule {
                id: "error-rate".to_string(),
                metric: MetricKey::ErrorRate,
                target: default_target(),
                condition: Condition::GreaterThan,
                threshold: 0.05,
                sustained_seconds: 0,
                channel: NotificationChannel::Log,
                enabled: true,
            },
            AlertRule {
                id: "latency".to_string(),
                metric: MetricKey::LatencyMs,
                target: default_target(),
                condition: Condition::GreaterThan,
                threshold: 1000.0,
                sustained_seconds: 300,
                channel: NotificationChannel::Log,
                enabled: true,
            },
            AlertRule {
                id: "query-time".to_string(),
                metric: MetricKey::AvgQueryTimeMs,
                target: default_target(),
                condition: Condition::GreaterThan,
                threshold: 1000.0,
                sustained_seconds: 300,
                channel: NotificationChannel::Log,
                enabled: true,
            },
        ]
    }
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(ParseEnumError::new("severity", other)),
        }
    }
}

/// One firing of an alert rule against one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: i64,
    pub asset_id: String,
    pub rule_id: String,
    pub metric: MetricKey,
    pub value: f64,
    pub threshold: f64,
    pub condition: Condition,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

// ─── Timeframes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Timeframe {
    pub fn duration_ms(&self) -> i64 {
        const HOUR: i64 = 60 * 60 * 1000;
        match self {
            Self::Hour => HOUR,
            Self::Day => 24 * HOUR,
            Self::Week => 7 * 24 * HOUR,
            Self::Month => 30 * 24 * HOUR,
        }
    }

    pub fn days(&self) -> f64 {
        self.duration_ms() as f64 / (24.0 * 60.0 * 60.0 * 1000.0)
    }

    /// Earliest timestamp inside this window ending at `now_ms`.
    pub fn since(&self, now_ms: i64) -> i64 {
        now_ms - self.duration_ms()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hour => write!(f, "1h"),
            Self::Day => write!(f, "24h"),
            Self::Week => write!(f, "7d"),
            Self::Month => write!(f, "30d"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" | "hour" => Ok(Self::Hour),
            "24h" | "1d" | "day" => Ok(Self::Day),
            "7d" | "week" => Ok(Self::Week),
            "30d" | "month" => Ok(Self::Month),
            other => Err(ParseEnumError::new("timeframe", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_roundtrip_names() {
        for t in AssetType::ALL {
            assert_eq!(t.as_str().parse::<AssetType>().expect("parse"), t);
        }
        assert_eq!(AssetType::RelationalDb.to_string(), "relational-db");
        assert!("database".parse::<AssetType>().is_err());
    }

    #[test]
    fn test_asset_type_serde_matches_display() {
        let json = serde_json::to_string(&AssetType::KvNamespace).expect("serialize");
        assert_eq!(json, "\"kv-namespace\"");
    }

    #[test]
    fn test_metric_key_serde_matches_as_str() {
        for key in MetricKey::ALL {
            let json = serde_json::to_string(&key).expect("serialize");
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
    }

    #[test]
    fn test_metric_kinds() {
        assert_eq!(MetricKey::Requests.kind(), MetricKind::Counter);
        assert_eq!(MetricKey::StorageBytes.kind(), MetricKind::Gauge);
        assert_eq!(MetricKey::ErrorRate.kind(), MetricKind::Derived);
    }

    #[test]
    fn test_error_rate_zero_denominator() {
        assert_eq!(error_rate(0.0, 0.0), 0.0);
        assert!((error_rate(10.0, 90.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_condition_parsing_and_holds() {
        assert_eq!("gt".parse::<Condition>().expect("gt"), Condition::GreaterThan);
        assert_eq!("less_than".parse::<Condition>().expect("lt"), Condition::LessThan);
        assert!("between".parse::<Condition>().is_err());

        assert!(Condition::GreaterThan.holds(0.1, 0.05));
        assert!(!Condition::GreaterThan.holds(0.05, 0.05));
        assert!(Condition::LessThan.holds(1.0, 2.0));
        assert!(Condition::Equal.holds(0.1 + 0.2, 0.3));
    }

    #[test]
    fn test_rule_applies_to_target() {
        let mut rule = AlertRule::defaults().remove(0);
        assert!(rule.applies_to("anything"));
        rule.target = "fn-1".to_string();
        assert!(rule.applies_to("fn-1"));
        assert!(!rule.applies_to("fn-2"));
        rule.enabled = false;
        assert!(!rule.applies_to("fn-1"));
    }

    #[test]
    fn test_rule_deserialize_with_defaults() {
        let rule: AlertRule = serde_json::from_str(
            r#"{"id":"r1","metric":"errorRate","condition":"greater_than","threshold":0.1}"#,
        )
        .expect("deserialize");
        assert_eq!(rule.target, ALL_ASSETS);
        assert_eq!(rule.channel, NotificationChannel::Log);
        assert_eq!(rule.sustained_seconds, 0);
        assert!(rule.enabled);
    }

    #[test]
    fn test_timeframe_windows() {
        assert_eq!(Timeframe::Day.duration_ms(), 86_400_000);
        assert_eq!(Timeframe::Week.days(), 7.0);
        assert_eq!("30d".parse::<Timeframe>().expect("parse"), Timeframe::Month);
        assert_eq!(Timeframe::Hour.since(3_600_000), 0);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snap = Snapshot {
            asset_id: "fn-1".to_string(),
            asset_type: AssetType::Function,
            project: "shop".to_string(),
            timestamp: 1_700_000_000_000,
            metrics: Metrics::new().with(MetricKey::Requests, 100.0),
            status: HealthStatus::Healthy,
            error: None,
        };
        let json = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(json["metrics"]["requests"], 100.0);
        assert!(json.get("error").is_none());

        let back: Snapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, snap);
    }
}
