//! Stateful alert engine: rule set, dedup table and bounded alert history.

use crate::error::RuleError;
use crate::notify::{ChannelDelivery, Dispatcher};
use crate::rules::{AlertRuleConfig, RuleOutcome, evaluate, message, severity};
use fw_proto::{Alert, AlertRule, Condition, MetricKey, NotificationChannel, Severity, Snapshot, now_ms};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default cap on retained alerts.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// A newly fired alert and the channel its rule routes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub alert: Alert,
    pub channel: NotificationChannel,
}

/// State changes produced by one [`AlertEngine::process`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    pub fired: Vec<Fired>,
    pub resolved: Vec<Alert>,
}

#[derive(Default)]
struct AlertState {
    history: VecDeque<Alert>,
    /// Unresolved alert per (asset_id, metric).
    open: HashMap<(String, MetricKey), Uuid>,
}

impl AlertState {
    fn record(&mut self, alert: Alert, max_history: usize) {
        self.history.push_back(alert);
        while self.history.len() > max_history {
            let idx = self.history.iter().position(|a| a.resolved).unwrap_or(0);
            if let Some(dropped) = self.history.remove(idx) {
                if !dropped.resolved {
                    self.open.retain(|_, id| *id != dropped.id);
                }
                debug!(alert_id = %dropped.id, resolved = dropped.resolved, "alert history full, dropped oldest");
            }
        }
    }

    fn resolve(&mut self, key: &(String, MetricKey), at: i64) -> Option<Alert> {
        let id = self.open.remove(key)?;
        let alert = self.history.iter_mut().find(|a| a.id == id)?;
        alert.resolved = true;
        alert.resolved_at = Some(at);
        Some(alert.clone())
    }
}

pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    state: Mutex<AlertState>,
    max_history: usize,
    dispatcher: Dispatcher,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertRule::defaults(), Dispatcher::default())
    }
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, dispatcher: Dispatcher) -> Self {
        Self {
            rules: RwLock::new(rules),
            state: Mutex::new(AlertState::default()),
            max_history: DEFAULT_MAX_HISTORY,
            dispatcher,
        }
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max.max(1);
        self
    }

    // ─── Rules ───────────────────────────────────────────────────────────────

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Validate `config` and insert it, replacing any rule with the same id.
    pub fn set_rule(&self, config: &AlertRuleConfig) -> Result<AlertRule, RuleError> {
        let rule = config.validate()?;
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        info!(rule = %rule.id, metric = %rule.metric, target = %rule.target, "alert rule set");
        Ok(rule)
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        let removed = rules.len() != before;
        if removed {
            info!(rule = %id, "alert rule removed");
        }
        removed
    }

    // ─── Evaluation ──────────────────────────────────────────────────────────

    /// Evaluate one snapshot against the rule set and update alert state.
    ///
    /// A firing rule opens an alert unless one is already open for the same
    /// asset and metric. When no rule on a metric is violated any more, the
    /// open alert for that metric is resolved.
    pub fn process(&self, snapshot: &Snapshot, history: &[Snapshot]) -> ProcessOutcome {
        let rules = self.rules();
        let outcomes = evaluate(snapshot, history, &rules);

        // Per metric: whether any rule is violated, and the most severe firing rule.
        let mut by_metric: BTreeMap<MetricKey, (bool, Option<&RuleOutcome>)> = BTreeMap::new();
        for outcome in &outcomes {
            let entry = by_metric.entry(outcome.rule.metric).or_insert((false, None));
            entry.0 |= outcome.violated;
            if outcome.fires {
                let replace = entry.1.is_none_or(|current| {
                    severity(outcome.value, outcome.rule.threshold) > severity(current.value, current.rule.threshold)
                });
                if replace {
                    entry.1 = Some(outcome);
                }
            }
        }

        let mut result = ProcessOutcome::default();
        let mut state = self.state.lock();
        for (metric, (violated, firing)) in by_metric {
            let key = (snapshot.asset_id.clone(), metric);
            match firing {
                Some(outcome) => {
                    if state.open.contains_key(&key) {
                        continue;
                    }
                    let alert = build_alert(snapshot, outcome);
                    state.open.insert(key, alert.id);
                    state.record(alert.clone(), self.max_history);
                    result.fired.push(Fired {
                        alert,
                        channel: outcome.rule.channel,
                    });
                }
                None if !violated => {
                    if let Some(alert) = state.resolve(&key, snapshot.timestamp) {
                        info!(alert_id = %alert.id, asset = %alert.asset_id, metric = %metric, "alert resolved");
                        result.resolved.push(alert);
                    }
                }
                None => {}
            }
        }
        result
    }

    /// Resolve every open alert for an asset that is no longer discovered.
    pub fn retire_asset(&self, asset_id: &str, at: i64) -> Vec<Alert> {
        let mut state = self.state.lock();
        let keys: Vec<(String, MetricKey)> = state.open.keys().filter(|(id, _)| id == asset_id).cloned().collect();
        let resolved: Vec<Alert> = keys.iter().filter_map(|key| state.resolve(key, at)).collect();
        if !resolved.is_empty() {
            info!(asset = %asset_id, count = resolved.len(), "alerts resolved for vanished asset");
        }
        resolved
    }

    /// Deliver fired alerts. Failures are logged and counted, never returned.
    pub async fn notify(&self, fired: &[Fired]) -> usize {
        let deliveries = fired.iter().map(|f| async move {
            let result = self.dispatcher.dispatch(&f.alert, f.channel).await;
            if let Err(e) = &result {
                warn!(
                    alert_id = %f.alert.id,
                    channel = %f.channel,
                    error = %e,
                    alert_message = %f.alert.message,
                    "alert notification failed"
                );
            }
            result.is_err()
        });
        futures_util::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|failed| *failed)
            .count()
    }

    /// Send a synthetic alert through every configured channel. Not recorded.
    pub async fn test_alert(&self) -> Vec<ChannelDelivery> {
        let alert = Alert {
            id: Uuid::new_v4(),
            timestamp: now_ms(),
            asset_id: "fleetwatch-test".to_string(),
            rule_id: "test".to_string(),
            metric: MetricKey::ErrorRate,
            value: 0.0,
            threshold: 0.0,
            condition: Condition::GreaterThan,
            severity: Severity::Info,
            message: "FleetWatch test alert: notification channels are working".to_string(),
            resolved: false,
            resolved_at: None,
        };
        self.dispatcher.deliver_all(&alert).await
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Unresolved alerts, oldest first.
    pub fn active(&self) -> Vec<Alert> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    /// Alerts raised at or after `since_ms`, newest first, optionally only
    /// those of one severity.
    pub fn recent(&self, since_ms: i64, level: Option<Severity>) -> Vec<Alert> {
        self.state
            .lock()
            .history
            .iter()
            .rev()
            .filter(|a| a.timestamp >= since_ms)
            .filter(|a| level.is_none_or(|s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }
}

fn build_alert(snapshot: &Snapshot, outcome: &RuleOutcome) -> Alert {
    let rule = &outcome.rule;
    Alert {
        id: Uuid::new_v4(),
        timestamp: snapshot.timestamp,
        asset_id: snapshot.asset_id.clone(),
        rule_id: rule.id.clone(),
        metric: rule.metric,
        value: outcome.value,
        threshold: rule.threshold,
        condition: rule.condition,
        severity: severity(outcome.value, rule.threshold),
        message: message(&snapshot.asset_id, rule.metric, outcome.value, rule.condition, rule.threshold),
        resolved: false,
        resolved_at: None,
    }
}
