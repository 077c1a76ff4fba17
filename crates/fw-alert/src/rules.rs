//! Rule validation and pure evaluation.

use crate::error::RuleError;
use fw_proto::{ALL_ASSETS, AlertRule, Condition, MetricKey, NotificationChannel, Severity, Snapshot};
use serde::{Deserialize, Serialize};

// ─── Rule configuration ──────────────────────────────────────────────────────

/// Unvalidated rule as submitted by a caller. Enumerated fields are strings
/// so that unknown values surface as [`RuleError`]s rather than decode errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub sustained_seconds: Option<u64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl AlertRuleConfig {
    pub fn validate(&self) -> Result<AlertRule, RuleError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(RuleError::EmptyId);
        }

        let metric: MetricKey = self
            .metric
            .parse()
            .map_err(|_| RuleError::UnknownMetric(self.metric.clone()))?;
        let condition: Condition = self
            .condition
            .parse()
            .map_err(|_| RuleError::UnknownCondition(self.condition.clone()))?;

        let threshold = self.threshold.ok_or(RuleError::MissingThreshold)?;
        if !threshold.is_finite() {
            return Err(RuleError::InvalidThreshold(threshold));
        }

        let channel = match self.channel.as_deref() {
            None => NotificationChannel::Log,
            Some(name) => name
                .parse()
                .map_err(|_| RuleError::UnknownChannel(name.to_string()))?,
        };

        let target = match self.target.as_deref().map(str::trim) {
            None => ALL_ASSETS.to_string(),
            Some("") => return Err(RuleError::EmptyTarget),
            Some(t) => t.to_string(),
        };

        Ok(AlertRule {
            id: id.to_string(),
            metric,
            target,
            condition,
            threshold,
            sustained_seconds: self.sustained_seconds.unwrap_or(0),
            channel,
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

impl From<&AlertRule> for AlertRuleConfig {
    fn from(rule: &AlertRule) -> Self {
        Self {
            id: rule.id.clone(),
            metric: rule.metric.to_string(),
            target: Some(rule.target.clone()),
            condition: rule.condition.to_string(),
            threshold: Some(rule.threshold),
            sustained_seconds: Some(rule.sustained_seconds),
            channel: Some(rule.channel.to_string()),
            enabled: Some(rule.enabled),
        }
    }
}

// ─── Severity & message ──────────────────────────────────────────────────────

/// Severity from the value/threshold ratio: ≥2.0 critical, ≥1.5 warning.
/// With a zero threshold any non-zero value is critical.
pub fn severity(value: f64, threshold: f64) -> Severity {
    if threshold == 0.0 {
        return if value != 0.0 { Severity::Critical } else { Severity::Info };
    }
    let ratio = (value / threshold).abs();
    if ratio >= 2.0 {
        Severity::Critical
    } else if ratio >= 1.5 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

pub fn message(asset_id: &str, metric: MetricKey, value: f64, condition: Condition, threshold: f64) -> String {
    format!(
        "{asset_id}: {metric} is {value} ({} {threshold}, severity {})",
        condition.symbol(),
        severity(value, threshold)
    )
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Result of checking one rule against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule: AlertRule,
    pub value: f64,
    pub violated: bool,
    /// Violated long enough to satisfy `sustained_seconds`.
    pub fires: bool,
}

/// Check every enabled rule targeting the snapshot's asset whose metric the
/// snapshot carries. `history` is the asset's series, oldest first; entries at
/// or after the snapshot's own timestamp are ignored.
pub fn evaluate(snapshot: &Snapshot, history: &[Snapshot], rules: &[AlertRule]) -> Vec<RuleOutcome> {
    rules
        .iter()
        .filter(|rule| rule.applies_to(&snapshot.asset_id))
        .filter_map(|rule| {
            let value = snapshot.value(rule.metric)?;
            let violated = rule.condition.holds(value, rule.threshold);
            let fires = violated && sustained_for(rule, snapshot, history) >= sustained_ms(rule);
            Some(RuleOutcome {
                rule: rule.clone(),
                value,
                violated,
                fires,
            })
        })
        .collect()
}

fn sustained_ms(rule: &AlertRule) -> i64 {
    i64::try_from(rule.sustained_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// How long the current unbroken violation streak has lasted, in ms.
fn sustained_for(rule: &AlertRule, snapshot: &Snapshot, history: &[Snapshot]) -> i64 {
    let mut start = snapshot.timestamp;
    for prev in history
        .iter()
        .rev()
        .filter(|s| s.asset_id == snapshot.asset_id && s.timestamp < snapshot.timestamp)
    {
        match prev.value(rule.metric) {
            Some(v) if rule.condition.holds(v, rule.threshold) => start = prev.timestamp,
            _ => break,
        }
    }
    snapshot.timestamp - start
}
