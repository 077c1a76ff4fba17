//! Asset discovery for FleetWatch.
//!
//! Enumerates every resource type on a platform account through the REST
//! listing endpoints and normalises the results into [`Asset`]s. One type
//! failing never hides the others: [`DiscoveryClient::discover_all`] runs all
//! types concurrently and reports failures next to whatever succeeded.

#![forbid(unsafe_code)]

pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod project;

use fw_proto::{Asset, AssetType};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use client::{ApiError, HttpPlatformClient, PlatformClient, unwrap_envelope};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPlatform;
pub use project::{ProjectPreset, derive_project_name};

/// Listing page size requested from the platform.
pub const PER_PAGE: u32 = 100;
/// Hard stop for runaway pagination.
pub const MAX_PAGES: u32 = 100;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery of {asset_type} failed: {source}")]
    Upstream {
        asset_type: AssetType,
        #[source]
        source: ApiError,
    },
    #[error("malformed {asset_type} listing: {reason}")]
    Malformed { asset_type: AssetType, reason: String },
    #[error("discovery of {asset_type} timed out after {timeout:?}")]
    Timeout { asset_type: AssetType, timeout: Duration },
}

impl DiscoveryError {
    pub fn asset_type(&self) -> AssetType {
        match self {
            Self::Upstream { asset_type, .. }
            | Self::Malformed { asset_type, .. }
            | Self::Timeout { asset_type, .. } => *asset_type,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { source, .. } => source.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

// ─── Listing item shapes ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScriptItem {
    id: String,
    #[serde(default)]
    created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<BucketItem>,
}

#[derive(Debug, Deserialize)]
struct BucketItem {
    name: String,
    #[serde(default)]
    creation_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatabaseItem {
    uuid: String,
    name: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ActorNamespaceItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    script: Option<String>,
}

/// REST listing path for an asset type, relative to the account.
pub fn listing_path(account_id: &str, asset_type: AssetType) -> String {
    let suffix = match asset_type {
        AssetType::Function => "workers/scripts",
        AssetType::Bucket => "r2/buckets",
        AssetType::RelationalDb => "d1/database",
        AssetType::KvNamespace => "storage/kv/namespaces",
        AssetType::ActorNamespace => "workers/durable_objects/namespaces",
    };
    format!("/accounts/{account_id}/{suffix}")
}

// ─── Discovery report ────────────────────────────────────────────────────────

/// Outcome of one full discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub assets: Vec<Asset>,
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    pub fn count_of(&self, asset_type: AssetType) -> usize {
        self.assets.iter().filter(|a| a.asset_type == asset_type).count()
    }
}

// ─── Discovery client ────────────────────────────────────────────────────────

pub struct DiscoveryClient {
    client: Arc<dyn PlatformClient>,
    account_id: String,
    presets: Vec<ProjectPreset>,
    call_timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(client: Arc<dyn PlatformClient>, account_id: &str) -> Self {
        Self {
            client,
            account_id: account_id.to_string(),
            presets: Vec::new(),
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_presets(mut self, presets: Vec<ProjectPreset>) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// List every asset of one type. An empty account yields `Ok(vec![])`.
    pub async fn discover(&self, asset_type: AssetType) -> Result<Vec<Asset>> {
        let base = listing_path(&self.account_id, asset_type);
        let mut assets = Vec::new();
        let mut page = 1u32;

        loop {
            let path = format!("{base}?page={page}&per_page={PER_PAGE}");
            let body = self
                .client
                .get_json(&path)
                .await
                .map_err(|source| DiscoveryError::Upstream { asset_type, source })?;
            let listing = unwrap_envelope(body)
                .map_err(|source| DiscoveryError::Upstream { asset_type, source })?;

            let has_more = listing.has_more(page);
            let batch = self.normalize(asset_type, listing.result)?;
            debug!(%asset_type, page, count = batch.len(), "listing page");
            let empty = batch.is_empty();
            assets.extend(batch);

            if empty || !has_more || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }

        info!(%asset_type, count = assets.len(), "discovered assets");
        Ok(assets)
    }

    /// Discover every type concurrently. Each type is bounded by the call timeout.
    pub async fn discover_all(&self) -> DiscoveryReport {
        let timeout = self.call_timeout;
        let passes = AssetType::ALL.into_iter().map(|asset_type| async move {
            match tokio::time::timeout(timeout, self.discover(asset_type)).await {
                Ok(result) => result,
                Err(_) => Err(DiscoveryError::Timeout { asset_type, timeout }),
            }
        });

        let mut report = DiscoveryReport::default();
        for result in futures_util::future::join_all(passes).await {
            match result {
                Ok(assets) => report.assets.extend(assets),
                Err(e) => {
                    warn!(
                        asset_type = %e.asset_type(),
                        status = ?e.upstream_status(),
                        error = %e,
                        "discovery failed for resource type"
                    );
                    report.errors.push(e);
                }
            }
        }
        report
    }

    fn normalize(&self, asset_type: AssetType, result: Value) -> Result<Vec<Asset>> {
        let malformed = |e: serde_json::Error| DiscoveryError::Malformed {
            asset_type,
            reason: e.to_string(),
        };

        let raw: Vec<(String, String, Option<String>)> = match asset_type {
            AssetType::Function => serde_json::from_value::<Vec<ScriptItem>>(result)
                .map_err(malformed)?
                .into_iter()
                .map(|s| (s.id.clone(), s.id, s.created_on))
                .collect(),
            AssetType::Bucket => serde_json::from_value::<BucketList>(result)
                .map_err(malformed)?
                .buckets
                .into_iter()
                .map(|b| (b.name.clone(), b.name, b.creation_date))
                .collect(),
            AssetType::RelationalDb => serde_json::from_value::<Vec<DatabaseItem>>(result)
                .map_err(malformed)?
                .into_iter()
                .map(|d| (d.uuid, d.name, d.created_at))
                .collect(),
            AssetType::KvNamespace => serde_json::from_value::<Vec<NamespaceItem>>(result)
                .map_err(malformed)?
                .into_iter()
                .map(|n| (n.id, n.title, None))
                .collect(),
            AssetType::ActorNamespace => serde_json::from_value::<Vec<ActorNamespaceItem>>(result)
                .map_err(malformed)?
                .into_iter()
                .map(|n| {
                    let name = n
                        .name
                        .or(n.class)
                        .or(n.script)
                        .unwrap_or_else(|| n.id.clone());
                    (n.id, name, None)
                })
                .collect(),
        };

        Ok(raw
            .into_iter()
            .map(|(id, name, created_at)| Asset {
                project: derive_project_name(&name, &self.presets),
                id,
                name,
                asset_type,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(result: Value) -> client::ApiResult<Value> {
        Ok(json!({"success": true, "errors": [], "result": result}))
    }

    fn mock_account() -> Arc<MockPlatform> {
        let mock = MockPlatform::new();
        mock.on_get(
            &listing_path("acc", AssetType::Function),
            ok(json!([{"id": "shop-api"}, {"id": "blog-render", "created_on": "2024-01-01T00:00:00Z"}])),
        )
        .on_get(
            &listing_path("acc", AssetType::Bucket),
            ok(json!({"buckets": [{"name": "shop-assets"}]})),
        )
        .on_get(
            &listing_path("acc", AssetType::RelationalDb),
            ok(json!([{"uuid": "d1-uuid", "name": "shop-db"}])),
        )
        .on_get(&listing_path("acc", AssetType::KvNamespace), ok(json!([])))
        .on_get(
            &listing_path("acc", AssetType::ActorNamespace),
            ok(json!([{"id": "do-1", "class": "RoomCounter", "script": "chat-worker"}])),
        );
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_discover_normalizes_functions() {
        let client = DiscoveryClient::new(mock_account(), "acc");
        let assets = client.discover(AssetType::Function).await.expect("discover");
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].id, "shop-api");
        assert_eq!(assets[0].project, "shop");
        assert_eq!(assets[1].created_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_discover_database_uses_uuid_as_id() {
        let client = DiscoveryClient::new(mock_account(), "acc");
        let dbs = client.discover(AssetType::RelationalDb).await.expect("discover");
        assert_eq!(dbs[0].id, "d1-uuid");
        assert_eq!(dbs[0].name, "shop-db");
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_an_error() {
        let client = DiscoveryClient::new(mock_account(), "acc");
        let kv = client.discover(AssetType::KvNamespace).await.expect("discover");
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_actor_namespace_falls_back_to_class_name() {
        let client = DiscoveryClient::new(mock_account(), "acc");
        let ns = client.discover(AssetType::ActorNamespace).await.expect("discover");
        assert_eq!(ns[0].name, "RoomCounter");
    }

    #[tokio::test]
    async fn test_malformed_listing() {
        let mock = MockPlatform::new();
        mock.on_get(&listing_path("acc", AssetType::Bucket), ok(json!([1, 2, 3])));
        let client = DiscoveryClient::new(Arc::new(mock), "acc");
        let err = client.discover(AssetType::Bucket).await.expect_err("malformed");
        assert!(matches!(err, DiscoveryError::Malformed { asset_type: AssetType::Bucket, .. }));
    }

    #[tokio::test]
    async fn test_discover_all_isolates_failing_type() {
        let mock = MockPlatform::new();
        mock.on_get(&listing_path("acc", AssetType::Function), ok(json!([{"id": "shop-api"}])))
            .on_get(
                &listing_path("acc", AssetType::Bucket),
                Err(ApiError::Status { status: 403, body: "forbidden".to_string() }),
            )
            .on_get(&listing_path("acc", AssetType::RelationalDb), ok(json!([])))
            .on_get(&listing_path("acc", AssetType::KvNamespace), ok(json!([])))
            .on_get(&listing_path("acc", AssetType::ActorNamespace), ok(json!([])));

        let client = DiscoveryClient::new(Arc::new(mock), "acc");
        let report = client.discover_all().await;

        assert_eq!(report.assets.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].asset_type(), AssetType::Bucket);
        assert_eq!(report.errors[0].upstream_status(), Some(403));
    }

    #[tokio::test]
    async fn test_discover_all_times_out_slow_type() {
        let mock = mock_account();
        mock.delay("r2/buckets", Duration::from_millis(300));
        let client = DiscoveryClient::new(mock, "acc").with_call_timeout(Duration::from_millis(50));

        let report = client.discover_all().await;
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], DiscoveryError::Timeout { asset_type: AssetType::Bucket, .. }));
        assert_eq!(report.count_of(AssetType::Function), 2);
    }

    #[tokio::test]
    async fn test_discover_follows_pagination_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc/storage/kv/namespaces"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": [{"id": "ns-1", "title": "shop-sessions"}],
                "result_info": {"page": 1, "per_page": 100, "total_pages": 2}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc/storage/kv/namespaces"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": [{"id": "ns-2", "title": "blog-cache"}],
                "result_info": {"page": 2, "per_page": 100, "total_pages": 2}
            })))
            .mount(&server)
            .await;

        let http = HttpPlatformClient::new(&server.uri(), "token", Duration::from_secs(5))
            .expect("client");
        let client = DiscoveryClient::new(Arc::new(http), "acc")
            .with_presets(vec![ProjectPreset::new("blog", "journal")]);
        let assets = client.discover(AssetType::KvNamespace).await.expect("discover");

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].project, "shop");
        assert_eq!(assets[1].project, "journal");
    }
}
