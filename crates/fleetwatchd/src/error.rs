//! Daemon and query error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(String),

    #[error("platform client error: {0}")]
    Client(#[from] fw_discovery::ApiError),

    #[error("notification setup error: {0}")]
    Notification(#[from] fw_alert::NotificationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

/// Failure of an on-demand query.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid alert rule: {0}")]
    Validation(#[from] fw_alert::RuleError),

    #[error("store error: {0}")]
    Store(#[from] fw_store::StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
