//! GraphQL analytics queries and response parsing, one dataset set per asset type.

use fw_proto::{MetricKey, Metrics, error_rate};
use serde_json::Value;

/// Query duration above which a relational-db query counts as slow.
pub const SLOW_QUERY_MS: u64 = 100;

pub const FUNCTION_QUERY: &str = r#"query FunctionMetrics($accountTag: string!, $assetId: string!, $start: Time!, $end: Time!) {
  viewer {
    accounts(filter: {accountTag: $accountTag}) {
      workersInvocationsAdaptive(limit: 1, filter: {scriptName: $assetId, datetime_geq: $start, datetime_lt: $end}) {
        sum { requests errors cpuTimeUs }
        quantiles { wallTimeP50 }
      }
    }
  }
}"#;

pub const BUCKET_QUERY: &str = r#"query BucketMetrics($accountTag: string!, $assetId: string!, $start: Time!, $end: Time!) {
  viewer {
    accounts(filter: {accountTag: $accountTag}) {
      r2StorageAdaptiveGroups(limit: 1, filter: {bucketName: $assetId, datetime_geq: $start, datetime_lt: $end}, orderBy: [datetime_DESC]) {
        max { objectCount payloadSize metadataSize }
      }
      r2OperationsAdaptiveGroups(limit: 1000, filter: {bucketName: $assetId, datetime_geq: $start, datetime_lt: $end}) {
        sum { requests }
        dimensions { actionType }
      }
    }
  }
}"#;

pub const DATABASE_QUERY: &str = r#"query DatabaseMetrics($accountTag: string!, $assetId: string!, $start: Time!, $end: Time!, $slowMs: uint64!) {
  viewer {
    accounts(filter: {accountTag: $accountTag}) {
      d1AnalyticsAdaptiveGroups(limit: 1, filter: {databaseId: $assetId, datetime_geq: $start, datetime_lt: $end}) {
        sum { readQueries writeQueries queryBatchTimeMs }
      }
      slowQueries: d1QueriesAdaptiveGroups(limit: 1, filter: {databaseId: $assetId, datetime_geq: $start, datetime_lt: $end, queryDurationMs_gt: $slowMs}) {
        count
      }
    }
  }
}"#;

pub const KV_QUERY: &str = r#"query KvMetrics($accountTag: string!, $assetId: string!, $start: Time!, $end: Time!) {
  viewer {
    accounts(filter: {accountTag: $accountTag}) {
      kvOperationsAdaptiveGroups(limit: 100, filter: {namespaceId: $assetId, datetime_geq: $start, datetime_lt: $end}) {
        sum { requests }
        dimensions { actionType }
      }
      kvStorageAdaptiveGroups(limit: 1, filter: {namespaceId: $assetId, datetime_geq: $start, datetime_lt: $end}, orderBy: [datetime_DESC]) {
        max { byteCount keyCount }
      }
    }
  }
}"#;

pub const ACTOR_QUERY: &str = r#"query ActorMetrics($accountTag: string!, $assetId: string!, $start: Time!, $end: Time!) {
  viewer {
    accounts(filter: {accountTag: $accountTag}) {
      durableObjectsInvocationsAdaptiveGroups(limit: 1, filter: {namespaceId: $assetId, datetime_geq: $start, datetime_lt: $end}) {
        sum { requests errors }
      }
    }
  }
}"#;

/// Read a numeric leaf; absent or non-numeric values count as 0.
pub(crate) fn num(node: &Value, path: &[&str]) -> f64 {
    path.iter()
        .try_fold(node, |cur, key| cur.get(*key))
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0)
}

fn first<'a>(account: &'a Value, dataset: &str) -> &'a Value {
    account
        .get(dataset)
        .and_then(|rows| rows.get(0))
        .unwrap_or(&Value::Null)
}

fn rows<'a>(account: &'a Value, dataset: &str) -> &'a [Value] {
    account
        .get(dataset)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn parse_function(account: &Value) -> Metrics {
    let row = first(account, "workersInvocationsAdaptive");
    let requests = num(row, &["sum", "requests"]);
    let errors = num(row, &["sum", "errors"]);
    Metrics::new()
        .with(MetricKey::Requests, requests)
        .with(MetricKey::Errors, errors)
        .with(MetricKey::ErrorRate, error_rate(errors, requests))
        .with(MetricKey::CpuTimeMs, num(row, &["sum", "cpuTimeUs"]) / 1000.0)
        .with(MetricKey::LatencyMs, num(row, &["quantiles", "wallTimeP50"]) / 1000.0)
}

/// Storage operation billing class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Mutations and listings.
    A,
    /// Reads and heads.
    B,
    /// Not billed (deletes, aborts).
    Free,
}

pub fn classify_operation(action: &str) -> OperationClass {
    const CLASS_A: [&str; 6] = ["Put", "Copy", "Create", "Complete", "Upload", "List"];
    const CLASS_B: [&str; 2] = ["Get", "Head"];

    if CLASS_A.iter().any(|p| action.starts_with(p)) {
        OperationClass::A
    } else if CLASS_B.iter().any(|p| action.starts_with(p)) {
        OperationClass::B
    } else {
        OperationClass::Free
    }
}

pub fn parse_bucket(account: &Value) -> Metrics {
    let storage = first(account, "r2StorageAdaptiveGroups");
    let (mut class_a, mut class_b) = (0.0, 0.0);
    for row in rows(account, "r2OperationsAdaptiveGroups") {
        let action = row
            .get("dimensions")
            .and_then(|d| d.get("actionType"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let count = num(row, &["sum", "requests"]);
        match classify_operation(action) {
            OperationClass::A => class_a += count,
            OperationClass::B => class_b += count,
            OperationClass::Free => {}
        }
    }

    Metrics::new()
        .with(MetricKey::ObjectCount, num(storage, &["max", "objectCount"]))
        .with(
            MetricKey::StorageBytes,
            num(storage, &["max", "payloadSize"]) + num(storage, &["max", "metadataSize"]),
        )
        .with(MetricKey::ClassAOps, class_a)
        .with(MetricKey::ClassBOps, class_b)
}

/// Query-level metrics of a relational database; storage and rows come from
/// the REST detail and query endpoints and are merged by the collector.
pub fn parse_database(account: &Value) -> Metrics {
    let row = first(account, "d1AnalyticsAdaptiveGroups");
    let reads = num(row, &["sum", "readQueries"]);
    let writes = num(row, &["sum", "writeQueries"]);
    let total = reads + writes;
    let batch_ms = num(row, &["sum", "queryBatchTimeMs"]);
    let avg = if total > 0.0 { batch_ms / total } else { 0.0 };

    Metrics::new()
        .with(MetricKey::TotalQueries, total)
        .with(MetricKey::ReadQueries, reads)
        .with(MetricKey::WriteQueries, writes)
        .with(MetricKey::AvgQueryTimeMs, avg)
        .with(MetricKey::SlowQueries, num(first(account, "slowQueries"), &["count"]))
}

pub fn parse_kv(account: &Value) -> Metrics {
    let (mut reads, mut writes, mut deletes, mut lists) = (0.0, 0.0, 0.0, 0.0);
    for row in rows(account, "kvOperationsAdaptiveGroups") {
        let action = row
            .get("dimensions")
            .and_then(|d| d.get("actionType"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let count = num(row, &["sum", "requests"]);
        match action {
            "read" => reads += count,
            "write" => writes += count,
            "delete" => deletes += count,
            "list" => lists += count,
            _ => {}
        }
    }
    let storage = first(account, "kvStorageAdaptiveGroups");

    Metrics::new()
        .with(MetricKey::ReadOps, reads)
        .with(MetricKey::WriteOps, writes)
        .with(MetricKey::DeleteOps, deletes)
        .with(MetricKey::ListOps, lists)
        .with(MetricKey::StorageBytes, num(storage, &["max", "byteCount"]))
}

pub fn parse_actor(account: &Value) -> Metrics {
    let row = first(account, "durableObjectsInvocationsAdaptiveGroups");
    let requests = num(row, &["sum", "requests"]);
    let errors = num(row, &["sum", "errors"]);
    Metrics::new()
        .with(MetricKey::Requests, requests)
        .with(MetricKey::Errors, errors)
        .with(MetricKey::ErrorRate, error_rate(errors, requests))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_error_rate() {
        let account = json!({
            "workersInvocationsAdaptive": [{
                "sum": {"requests": 100, "errors": 10, "cpuTimeUs": 250000},
                "quantiles": {"wallTimeP50": 42000}
            }]
        });
        let m = parse_function(&account);
        assert_eq!(m.get(MetricKey::Requests), Some(100.0));
        assert!((m.get(MetricKey::ErrorRate).unwrap() - 10.0 / 110.0).abs() < 1e-12);
        assert_eq!(m.get(MetricKey::CpuTimeMs), Some(250.0));
        assert_eq!(m.get(MetricKey::LatencyMs), Some(42.0));
    }

    #[test]
    fn test_function_without_traffic() {
        let m = parse_function(&json!({"workersInvocationsAdaptive": []}));
        assert_eq!(m.get(MetricKey::Requests), Some(0.0));
        assert_eq!(m.get(MetricKey::ErrorRate), Some(0.0));
    }

    #[test]
    fn test_operation_classes() {
        assert_eq!(classify_operation("PutObject"), OperationClass::A);
        assert_eq!(classify_operation("ListObjects"), OperationClass::A);
        assert_eq!(classify_operation("CompleteMultipartUpload"), OperationClass::A);
        assert_eq!(classify_operation("GetObject"), OperationClass::B);
        assert_eq!(classify_operation("HeadObject"), OperationClass::B);
        assert_eq!(classify_operation("DeleteObject"), OperationClass::Free);
    }

    #[test]
    fn test_bucket_sums_by_class() {
        let account = json!({
            "r2StorageAdaptiveGroups": [{"max": {"objectCount": 12, "payloadSize": 1000, "metadataSize": 24}}],
            "r2OperationsAdaptiveGroups": [
                {"sum": {"requests": 5}, "dimensions": {"actionType": "PutObject"}},
                {"sum": {"requests": 2}, "dimensions": {"actionType": "ListObjects"}},
                {"sum": {"requests": 40}, "dimensions": {"actionType": "GetObject"}},
                {"sum": {"requests": 3}, "dimensions": {"actionType": "DeleteObject"}}
            ]
        });
        let m = parse_bucket(&account);
        assert_eq!(m.get(MetricKey::ObjectCount), Some(12.0));
        assert_eq!(m.get(MetricKey::StorageBytes), Some(1024.0));
        assert_eq!(m.get(MetricKey::ClassAOps), Some(7.0));
        assert_eq!(m.get(MetricKey::ClassBOps), Some(40.0));
    }

    #[test]
    fn test_database_average_and_slow_queries() {
        let account = json!({
            "d1AnalyticsAdaptiveGroups": [{"sum": {"readQueries": 30, "writeQueries": 10, "queryBatchTimeMs": 200}}],
            "slowQueries": [{"count": 4}]
        });
        let m = parse_database(&account);
        assert_eq!(m.get(MetricKey::TotalQueries), Some(40.0));
        assert_eq!(m.get(MetricKey::AvgQueryTimeMs), Some(5.0));
        assert_eq!(m.get(MetricKey::SlowQueries), Some(4.0));
    }

    #[test]
    fn test_database_without_queries_has_zero_average() {
        let m = parse_database(&json!({}));
        assert_eq!(m.get(MetricKey::AvgQueryTimeMs), Some(0.0));
    }

    #[test]
    fn test_kv_operations() {
        let account = json!({
            "kvOperationsAdaptiveGroups": [
                {"sum": {"requests": 90}, "dimensions": {"actionType": "read"}},
                {"sum": {"requests": 7}, "dimensions": {"actionType": "write"}},
                {"sum": {"requests": 1}, "dimensions": {"actionType": "list"}}
            ],
            "kvStorageAdaptiveGroups": [{"max": {"byteCount": 2048, "keyCount": 9}}]
        });
        let m = parse_kv(&account);
        assert_eq!(m.get(MetricKey::ReadOps), Some(90.0));
        assert_eq!(m.get(MetricKey::DeleteOps), Some(0.0));
        assert_eq!(m.get(MetricKey::StorageBytes), Some(2048.0));
    }

    #[test]
    fn test_num_accepts_numeric_strings() {
        assert_eq!(num(&json!({"a": {"b": "12.5"}}), &["a", "b"]), 12.5);
        assert_eq!(num(&json!({}), &["a"]), 0.0);
    }
}
