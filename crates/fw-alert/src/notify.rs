//! Notification channels: structured log, Slack webhook, Discord webhook.

use crate::error::NotificationError;
use async_trait::async_trait;
use fw_proto::{Alert, NotificationChannel, Severity};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> NotificationChannel;
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Writes alerts to the tracing log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Log
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        match alert.severity {
            Severity::Critical => error!(
                alert_id = %alert.id,
                asset = %alert.asset_id,
                rule = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                "{}", alert.message
            ),
            Severity::Warning => warn!(
                alert_id = %alert.id,
                asset = %alert.asset_id,
                rule = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                "{}", alert.message
            ),
            Severity::Info => info!(
                alert_id = %alert.id,
                asset = %alert.asset_id,
                rule = %alert.rule_id,
                metric = %alert.metric,
                value = alert.value,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

fn severity_hex(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#d00000",
        Severity::Warning => "#f2c744",
        Severity::Info => "#439fe0",
    }
}

fn severity_rgb(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xd0_00_00,
        Severity::Warning => 0xf2_c7_44,
        Severity::Info => 0x43_9f_e0,
    }
}

pub fn slack_payload(alert: &Alert) -> Value {
    json!({
        "text": format!("[{}] {}", alert.severity, alert.message),
        "attachments": [{
            "color": severity_hex(alert.severity),
            "fields": [
                {"title": "Asset", "value": alert.asset_id, "short": true},
                {"title": "Rule", "value": alert.rule_id, "short": true},
                {"title": "Value", "value": alert.value.to_string(), "short": true},
                {"title": "Threshold", "value": format!("{} {}", alert.condition.symbol(), alert.threshold), "short": true},
            ],
            "ts": alert.timestamp / 1000,
        }]
    })
}

pub fn discord_payload(alert: &Alert) -> Value {
    json!({
        "content": format!("[{}] {}", alert.severity, alert.message),
        "embeds": [{
            "title": format!("{} on {}", alert.metric, alert.asset_id),
            "description": alert.message,
            "color": severity_rgb(alert.severity),
            "fields": [
                {"name": "Rule", "value": alert.rule_id, "inline": true},
                {"name": "Value", "value": alert.value.to_string(), "inline": true},
                {"name": "Threshold", "value": format!("{} {}", alert.condition.symbol(), alert.threshold), "inline": true},
            ]
        }]
    })
}

/// Posts alerts to a Slack- or Discord-compatible incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    channel: NotificationChannel,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(channel: NotificationChannel, url: &str, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Client(e.to_string()))?;
        Ok(Self {
            channel,
            url: url.to_string(),
            client,
        })
    }

    pub fn slack(url: &str, timeout: Duration) -> Result<Self, NotificationError> {
        Self::new(NotificationChannel::Slack, url, timeout)
    }

    pub fn discord(url: &str, timeout: Duration) -> Result<Self, NotificationError> {
        Self::new(NotificationChannel::Discord, url, timeout)
    }

    fn payload(&self, alert: &Alert) -> Value {
        match self.channel {
            NotificationChannel::Discord => discord_payload(alert),
            _ => slack_payload(alert),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let channel = self.channel;
        self.client
            .post(&self.url)
            .json(&self.payload(alert))
            .send()
            .await
            .map_err(|e| NotificationError::Transport {
                channel,
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| NotificationError::Status {
                channel,
                status: e.status().map_or(0, |s| s.as_u16()),
            })?;
        Ok(())
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Delivery result for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDelivery {
    pub channel: NotificationChannel,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Routes alerts to the notifier registered for their channel, bounding each
/// delivery by a timeout. The log channel is always present.
#[derive(Clone)]
pub struct Dispatcher {
    notifiers: BTreeMap<NotificationChannel, Arc<dyn Notifier>>,
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        let mut notifiers: BTreeMap<NotificationChannel, Arc<dyn Notifier>> = BTreeMap::new();
        notifiers.insert(NotificationChannel::Log, Arc::new(LogNotifier));
        Self { notifiers, timeout }
    }

    /// Register `notifier` for its channel, replacing any previous one.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.insert(notifier.channel(), notifier);
        self
    }

    /// Log channel plus whichever webhooks have a URL.
    pub fn from_webhooks(
        slack_url: Option<&str>,
        discord_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let mut dispatcher = Self::new(timeout);
        if let Some(url) = slack_url.filter(|u| !u.is_empty()) {
            dispatcher = dispatcher.with_notifier(Arc::new(WebhookNotifier::slack(url, timeout)?));
        }
        if let Some(url) = discord_url.filter(|u| !u.is_empty()) {
            dispatcher = dispatcher.with_notifier(Arc::new(WebhookNotifier::discord(url, timeout)?));
        }
        Ok(dispatcher)
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.notifiers.keys().copied().collect()
    }

    pub async fn dispatch(&self, alert: &Alert, channel: NotificationChannel) -> Result<(), NotificationError> {
        let notifier = self
            .notifiers
            .get(&channel)
            .ok_or(NotificationError::NotConfigured { channel })?;
        match tokio::time::timeout(self.timeout, notifier.send(alert)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout {
                channel,
                timeout: self.timeout,
            }),
        }
    }

    /// Send `alert` through every configured channel, one after another.
    pub async fn deliver_all(&self, alert: &Alert) -> Vec<ChannelDelivery> {
        let mut report = Vec::with_capacity(self.notifiers.len());
        for channel in self.channels() {
            let result = self.dispatch(alert, channel).await;
            report.push(ChannelDelivery {
                channel,
                delivered: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_proto::{Condition, MetricKey};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            timestamp: 1_700_000_000_000,
            asset_id: "shop-api".to_string(),
            rule_id: "error-rate".to_string(),
            metric: MetricKey::ErrorRate,
            value: 0.1,
            threshold: 0.05,
            condition: Condition::GreaterThan,
            severity: Severity::Critical,
            message: "shop-api: errorRate is 0.1 (> 0.05, severity critical)".to_string(),
            resolved: false,
            resolved_at: None,
        }
    }

    #[test]
    fn test_payload_shapes() {
        let slack = slack_payload(&alert());
        assert_eq!(slack["attachments"][0]["color"], "#d00000");
        assert!(slack["text"].as_str().expect("text").starts_with("[critical]"));

        let discord = discord_payload(&alert());
        assert_eq!(discord["embeds"][0]["color"], 0xd00000);
        assert_eq!(discord["embeds"][0]["title"], "errorRate on shop-api");
    }

    #[tokio::test]
    async fn test_log_channel_always_available() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.channels(), vec![NotificationChannel::Log]);
        dispatcher
            .dispatch(&alert(), NotificationChannel::Log)
            .await
            .expect("log delivery");
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_an_error() {
        let err = Dispatcher::default()
            .dispatch(&alert(), NotificationChannel::Discord)
            .await
            .expect_err("not configured");
        assert!(matches!(err, NotificationError::NotConfigured { channel: NotificationChannel::Discord }));
    }

    #[tokio::test]
    async fn test_slack_webhook_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/slack"))
            .and(body_partial_json(json!({"attachments": [{"color": "#d00000"}]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hooks/slack", server.uri());
        let dispatcher = Dispatcher::from_webhooks(Some(&url), None, Duration::from_secs(5)).expect("dispatcher");
        dispatcher
            .dispatch(&alert(), NotificationChannel::Slack)
            .await
            .expect("delivered");
    }

    #[tokio::test]
    async fn test_webhook_failure_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = format!("{}/hooks/discord", server.uri());
        let dispatcher = Dispatcher::from_webhooks(None, Some(&url), Duration::from_secs(5)).expect("dispatcher");
        let report = dispatcher.deliver_all(&alert()).await;

        assert_eq!(report.len(), 2);
        assert!(report[0].delivered);
        assert_eq!(report[1].channel, NotificationChannel::Discord);
        assert!(!report[1].delivered);
        assert!(report[1].error.as_deref().expect("error").contains("500"));
    }

    #[tokio::test]
    async fn test_slow_webhook_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let url = format!("{}/hooks/slack", server.uri());
        let dispatcher = Dispatcher::new(Duration::from_millis(50))
            .with_notifier(Arc::new(WebhookNotifier::slack(&url, Duration::from_secs(5)).expect("notifier")));
        let err = dispatcher
            .dispatch(&alert(), NotificationChannel::Slack)
            .await
            .expect_err("timeout");
        assert!(matches!(err, NotificationError::Timeout { .. }));
    }
}
