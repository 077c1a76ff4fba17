//! Shared fixtures for the FleetWatch integration tests.

#![forbid(unsafe_code)]

use fw_discovery::client::ApiResult;
use fw_discovery::{MockPlatform, listing_path};
use fw_proto::{AssetType, HealthStatus, MetricKey, Metrics, Snapshot};
use serde_json::{Value, json};
use std::sync::Arc;

pub const ACCOUNT: &str = "acc-test";

/// Wrap `result` in a successful REST envelope.
pub fn envelope(result: Value) -> ApiResult<Value> {
    Ok(json!({"success": true, "errors": [], "result": result}))
}

/// Wrap an account node in a GraphQL analytics response.
pub fn analytics(account: Value) -> ApiResult<Value> {
    Ok(json!({"data": {"viewer": {"accounts": [account]}}, "errors": null}))
}

/// An account with two functions, one bucket and one database, every type
/// listing successfully. Functions report `function_errors` errors per 90
/// successful requests.
pub fn mock_fleet(function_errors: u64) -> Arc<MockPlatform> {
    let mock = MockPlatform::new();
    mock.on_get(
        &listing_path(ACCOUNT, AssetType::Function),
        envelope(json!([
            {"id": "shop-api", "created_on": "2024-03-01T00:00:00Z"},
            {"id": "blog-render"}
        ])),
    )
    .on_get(
        &listing_path(ACCOUNT, AssetType::Bucket),
        envelope(json!({"buckets": [{"name": "shop-assets"}]})),
    )
    .on_get(
        &listing_path(ACCOUNT, AssetType::RelationalDb),
        envelope(json!([{"uuid": "db-1", "name": "shop-db"}])),
    )
    .on_get(&listing_path(ACCOUNT, AssetType::KvNamespace), envelope(json!([])))
    .on_get(&listing_path(ACCOUNT, AssetType::ActorNamespace), envelope(json!([])))
    .on_get(
        &format!("/accounts/{ACCOUNT}/d1/database/db-1"),
        envelope(json!({"uuid": "db-1", "file_size": 8192})),
    )
    .on_post(
        "workersInvocationsAdaptive",
        analytics(json!({"workersInvocationsAdaptive": [{
            "sum": {"requests": 90, "errors": function_errors, "cpuTimeUs": 4000},
            "quantiles": {"wallTimeP50": 35000}
        }]})),
    )
    .on_post(
        "r2StorageAdaptiveGroups",
        analytics(json!({
            "r2StorageAdaptiveGroups": [{"max": {"objectCount": 3, "payloadSize": 1000, "metadataSize": 24}}],
            "r2OperationsAdaptiveGroups": [
                {"dimensions": {"actionType": "PutObject"}, "sum": {"requests": 5}},
                {"dimensions": {"actionType": "GetObject"}, "sum": {"requests": 50}}
            ]
        })),
    )
    .on_post(
        "d1AnalyticsAdaptiveGroups",
        analytics(json!({
            "d1AnalyticsAdaptiveGroups": [{"sum": {"readQueries": 40, "writeQueries": 10, "queryBatchTimeMs": 100}}]
        })),
    );
    Arc::new(mock)
}

/// A snapshot carrying one metric.
pub fn snapshot(asset_id: &str, ts: i64, metric: MetricKey, value: f64) -> Snapshot {
    Snapshot {
        asset_id: asset_id.to_string(),
        asset_type: AssetType::Function,
        project: "shop".to_string(),
        timestamp: ts,
        metrics: Metrics::new().with(metric, value),
        status: HealthStatus::Healthy,
        error: None,
    }
}

/// A metric-less snapshot with the given status.
pub fn status_snapshot(asset_id: &str, ts: i64, status: HealthStatus) -> Snapshot {
    Snapshot {
        status,
        metrics: Metrics::new(),
        ..snapshot(asset_id, ts, MetricKey::Requests, 0.0)
    }
}
