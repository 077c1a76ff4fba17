use fw_proto::NotificationChannel;
use std::time::Duration;
use thiserror::Error;

/// Rejection of an alert rule submitted at runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule id must not be empty")]
    EmptyId,
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("unknown condition '{0}' (expected gt, lt or eq)")]
    UnknownCondition(String),
    #[error("unknown notification channel '{0}' (expected log, slack or discord)")]
    UnknownChannel(String),
    #[error("threshold is required")]
    MissingThreshold,
    #[error("threshold must be a finite number, got {0}")]
    InvalidThreshold(f64),
    #[error("rule target must be '*' or an asset id")]
    EmptyTarget,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no notifier configured for channel {channel}")]
    NotConfigured { channel: NotificationChannel },
    #[error("{channel} delivery failed: {message}")]
    Transport {
        channel: NotificationChannel,
        message: String,
    },
    #[error("{channel} webhook returned HTTP {status}")]
    Status { channel: NotificationChannel, status: u16 },
    #[error("{channel} delivery timed out after {timeout:?}")]
    Timeout {
        channel: NotificationChannel,
        timeout: Duration,
    },
    #[error("failed to build webhook client: {0}")]
    Client(String),
}
