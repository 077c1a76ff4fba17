//! Metrics collection for FleetWatch.
//!
//! Turns each discovered [`Asset`] into a [`Metrics`] map for one collection
//! window by querying the platform's GraphQL analytics API, plus REST detail
//! endpoints where analytics has no equivalent (database size and row counts).
//! Collection is read-only.

#![forbid(unsafe_code)]

pub mod analytics;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::stream::{self, StreamExt};
use fw_discovery::{ApiError, PlatformClient, unwrap_envelope};
use fw_proto::{Asset, AssetType, MetricKey, Metrics};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// GraphQL endpoint, relative to the API base URL.
pub const GRAPHQL_PATH: &str = "/graphql";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection for {asset_id} failed: {source}")]
    Upstream {
        asset_id: String,
        #[source]
        source: ApiError,
    },
    #[error("analytics query for {asset_id} returned errors: {message}")]
    Query { asset_id: String, message: String },
    #[error("malformed analytics response for {asset_id}: {reason}")]
    Malformed { asset_id: String, reason: String },
    #[error("collection for {asset_id} timed out after {timeout:?}")]
    Timeout { asset_id: String, timeout: Duration },
}

impl CollectionError {
    pub fn asset_id(&self) -> &str {
        match self {
            Self::Upstream { asset_id, .. }
            | Self::Query { asset_id, .. }
            | Self::Malformed { asset_id, .. }
            | Self::Timeout { asset_id, .. } => asset_id,
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectionError>;

// ─── Collection window ───────────────────────────────────────────────────────

/// Half-open interval `[start_ms, end_ms)` that counter metrics cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl CollectionWindow {
    /// The window of length `interval` ending at the tick `end_ms`.
    pub fn ending_at(end_ms: i64, interval: Duration) -> Self {
        let len = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        Self {
            start_ms: end_ms.saturating_sub(len),
            end_ms,
        }
    }

    fn rfc3339(ms: i64) -> Option<String> {
        DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Outcome of collecting one asset.
#[derive(Debug)]
pub struct Collected {
    pub asset: Asset,
    pub result: Result<Metrics>,
}

// ─── Collector ───────────────────────────────────────────────────────────────

pub struct MetricsCollector {
    client: Arc<dyn PlatformClient>,
    account_id: String,
    call_timeout: Duration,
    max_concurrency: usize,
}

impl MetricsCollector {
    pub fn new(client: Arc<dyn PlatformClient>, account_id: &str) -> Self {
        Self {
            client,
            account_id: account_id.to_string(),
            call_timeout: Duration::from_secs(10),
            max_concurrency: 8,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Collect every metric for one asset over `window`.
    pub async fn collect(&self, asset: &Asset, window: &CollectionWindow) -> Result<Metrics> {
        match tokio::time::timeout(self.call_timeout, self.collect_inner(asset, window)).await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::Timeout {
                asset_id: asset.id.clone(),
                timeout: self.call_timeout,
            }),
        }
    }

    /// Collect many assets with bounded concurrency. Results come back in
    /// input order and one failure never affects another asset.
    pub async fn collect_all(&self, assets: &[Asset], window: &CollectionWindow) -> Vec<Collected> {
        let mut results: Vec<(usize, Collected)> = stream::iter(assets.iter().enumerate())
            .map(|(idx, asset)| async move {
                let result = self.collect(asset, window).await;
                if let Err(e) = &result {
                    warn!(asset = %asset.id, asset_type = %asset.asset_type, error = %e, "metrics collection failed");
                }
                (idx, Collected { asset: asset.clone(), result })
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, c)| c).collect()
    }

    async fn collect_inner(&self, asset: &Asset, window: &CollectionWindow) -> Result<Metrics> {
        let (query, parse): (&str, fn(&Value) -> Metrics) = match asset.asset_type {
            AssetType::Function => (analytics::FUNCTION_QUERY, analytics::parse_function),
            AssetType::Bucket => (analytics::BUCKET_QUERY, analytics::parse_bucket),
            AssetType::RelationalDb => (analytics::DATABASE_QUERY, analytics::parse_database),
            AssetType::KvNamespace => (analytics::KV_QUERY, analytics::parse_kv),
            AssetType::ActorNamespace => (analytics::ACTOR_QUERY, analytics::parse_actor),
        };

        let account = self.analytics(asset, query, window).await?;
        let mut metrics = parse(&account);

        if asset.asset_type == AssetType::RelationalDb {
            metrics.set(MetricKey::StorageBytes, self.database_size(asset).await?);
            match self.database_rows(asset).await {
                Ok(rows) => metrics.set(MetricKey::RowCount, rows),
                Err(e) => debug!(asset = %asset.id, error = %e, "row count unavailable"),
            }
        }

        debug!(asset = %asset.id, metrics = metrics.len(), "collected");
        Ok(metrics)
    }

    /// Run one analytics query and return the account node.
    async fn analytics(&self, asset: &Asset, query: &str, window: &CollectionWindow) -> Result<Value> {
        let malformed = |reason: &str| CollectionError::Malformed {
            asset_id: asset.id.clone(),
            reason: reason.to_string(),
        };

        let start = CollectionWindow::rfc3339(window.start_ms).ok_or_else(|| malformed("window start out of range"))?;
        let end = CollectionWindow::rfc3339(window.end_ms).ok_or_else(|| malformed("window end out of range"))?;

        let body = json!({
            "query": query,
            "variables": {
                "accountTag": self.account_id,
                "assetId": asset.id,
                "start": start,
                "end": end,
                "slowMs": analytics::SLOW_QUERY_MS,
            }
        });

        let response = self
            .client
            .post_json(GRAPHQL_PATH, &body)
            .await
            .map_err(|source| CollectionError::Upstream {
                asset_id: asset.id.clone(),
                source,
            })?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array).filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CollectionError::Query {
                asset_id: asset.id.clone(),
                message,
            });
        }

        response
            .pointer("/data/viewer/accounts/0")
            .cloned()
            .ok_or_else(|| malformed("missing data.viewer.accounts[0]"))
    }

    async fn database_size(&self, asset: &Asset) -> Result<f64> {
        let path = format!("/accounts/{}/d1/database/{}", self.account_id, asset.id);
        let page = self
            .client
            .get_json(&path)
            .await
            .and_then(unwrap_envelope)
            .map_err(|source| CollectionError::Upstream {
                asset_id: asset.id.clone(),
                source,
            })?;
        Ok(analytics::num(&page.result, &["file_size"]))
    }

    /// Sum of `COUNT(*)` over every user table.
    async fn database_rows(&self, asset: &Asset) -> Result<f64> {
        let tables = self
            .database_query(
                asset,
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_cf_%'",
            )
            .await?;

        let names: Vec<String> = tables
            .iter()
            .flat_map(statement_rows)
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        if names.is_empty() {
            return Ok(0.0);
        }

        let sql = names
            .iter()
            .map(|t| format!("SELECT COUNT(*) AS c FROM \"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join("; ");
        let counts = self.database_query(asset, &sql).await?;

        Ok(counts
            .iter()
            .flat_map(statement_rows)
            .map(|row| analytics::num(row, &["c"]))
            .sum())
    }

    async fn database_query(&self, asset: &Asset, sql: &str) -> Result<Vec<Value>> {
        let path = format!("/accounts/{}/d1/database/{}/query", self.account_id, asset.id);
        let page = self
            .client
            .post_json(&path, &json!({ "sql": sql }))
            .await
            .and_then(unwrap_envelope)
            .map_err(|source| CollectionError::Upstream {
                asset_id: asset.id.clone(),
                source,
            })?;

        match page.result {
            Value::Array(statements) => Ok(statements),
            _ => Err(CollectionError::Malformed {
                asset_id: asset.id.clone(),
                reason: "query result is not a list of statements".to_string(),
            }),
        }
    }
}

fn statement_rows(statement: &Value) -> impl Iterator<Item = &Value> {
    statement
        .get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}
