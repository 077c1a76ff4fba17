//! Monitor configuration

use fw_alert::AlertRuleConfig;
use fw_discovery::ProjectPreset;
use fw_health::HealthPolicy;
use fw_ledger::PricingTable;
use fw_proto::AlertRule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

pub const ENV_API_TOKEN: &str = "FLEETWATCH_API_TOKEN";
pub const ENV_ACCOUNT_ID: &str = "FLEETWATCH_ACCOUNT_ID";

/// Webhook endpoints for the non-log notification channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_webhook_url: Option<String>,
}

/// Configuration for the fleetwatchd monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Platform account to monitor
    #[serde(default)]
    pub account_id: String,

    /// API token; falls back to FLEETWATCH_API_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Seconds between monitoring cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Per-call timeout for discovery, collection and notification
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Concurrent metric collections
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Snapshots kept per asset
    #[serde(default = "default_retention")]
    pub retention_per_asset: usize,

    /// Directory for persisted snapshots; memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    #[serde(default)]
    pub project_presets: Vec<ProjectPreset>,

    #[serde(default)]
    pub health_policy: HealthPolicy,

    #[serde(default = "AlertRule::defaults")]
    pub alert_rules: Vec<AlertRule>,

    #[serde(default = "default_max_alert_history")]
    pub max_alert_history: usize,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub pricing: PricingTable,

    /// Length of each period compared by the cost forecast
    #[serde(default = "default_forecast_period")]
    pub forecast_period_hours: u64,
}

fn default_api_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    8
}

fn default_retention() -> usize {
    fw_store::DEFAULT_RETENTION
}

fn default_max_alert_history() -> usize {
    fw_alert::DEFAULT_MAX_HISTORY
}

fn default_forecast_period() -> u64 {
    24
}

impl MonitorConfig {
    /// Load from a JSON file, fill credentials from the environment and validate.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("read {}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&data)
            .map_err(|e| DaemonError::Config(format!("parse {}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> DaemonResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Take credentials missing from the file from the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_token.as_deref().is_none_or(str::is_empty) {
            self.api_token = lookup(ENV_API_TOKEN).filter(|v| !v.is_empty());
        }
        if self.account_id.is_empty() {
            if let Some(account) = lookup(ENV_ACCOUNT_ID) {
                self.account_id = account;
            }
        }
    }

    pub fn validate(&self) -> DaemonResult<()> {
        if self.interval_secs == 0 {
            return Err(DaemonError::Config("interval_secs must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(DaemonError::Config("request_timeout_secs must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(DaemonError::Config("max_concurrency must be positive".into()));
        }
        if self.retention_per_asset == 0 {
            return Err(DaemonError::Config("retention_per_asset must be positive".into()));
        }
        if self.forecast_period_hours == 0 {
            return Err(DaemonError::Config("forecast_period_hours must be positive".into()));
        }

        let mut seen = HashSet::new();
        for rule in &self.alert_rules {
            AlertRuleConfig::from(rule)
                .validate()
                .map_err(|e| DaemonError::Config(format!("alert rule '{}': {e}", rule.id)))?;
            if !seen.insert(rule.id.as_str()) {
                return Err(DaemonError::Config(format!("duplicate alert rule id '{}'", rule.id)));
            }
        }

        self.pricing
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))
    }

    /// Account and token, or a config error naming what is missing.
    pub fn credentials(&self) -> DaemonResult<(&str, &str)> {
        if self.account_id.is_empty() {
            return Err(DaemonError::Config(format!(
                "account_id is not set (config file or {ENV_ACCOUNT_ID})"
            )));
        }
        match self.api_token.as_deref() {
            Some(token) if !token.is_empty() => Ok((&self.account_id, token)),
            _ => Err(DaemonError::Config(format!(
                "api_token is not set (config file or {ENV_API_TOKEN})"
            ))),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn forecast_period(&self) -> Duration {
        Duration::from_secs(self.forecast_period_hours * 3600)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            api_token: None,
            api_base_url: default_api_base_url(),
            interval_secs: default_interval(),
            request_timeout_secs: default_request_timeout(),
            max_concurrency: default_max_concurrency(),
            retention_per_asset: default_retention(),
            state_path: None,
            project_presets: Vec::new(),
            health_policy: HealthPolicy::default(),
            alert_rules: AlertRule::defaults(),
            max_alert_history: default_max_alert_history(),
            notifications: NotificationConfig::default(),
            pricing: PricingTable::default(),
            forecast_period_hours: default_forecast_period(),
        }
    }
}
