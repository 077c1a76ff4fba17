//! In-memory [`PlatformClient`] serving canned responses.
//!
//! GET routes match on the request path with any query string removed.
//! POST routes match when the route key appears anywhere in the serialized
//! request body, so GraphQL queries can be routed by dataset name.

use crate::client::{ApiError, ApiResult, PlatformClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockPlatform {
    gets: RwLock<HashMap<String, ApiResult<Value>>>,
    posts: RwLock<Vec<(String, ApiResult<Value>)>>,
    delay: RwLock<HashMap<String, Duration>>,
    calls: RwLock<Vec<String>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, path: &str, response: ApiResult<Value>) -> &Self {
        self.gets.write().insert(path.to_string(), response);
        self
    }

    pub fn on_post(&self, body_contains: &str, response: ApiResult<Value>) -> &Self {
        self.posts.write().push((body_contains.to_string(), response));
        self
    }

    /// Delay every request whose path (GET) or body (POST) contains `key`.
    pub fn delay(&self, key: &str, by: Duration) -> &Self {
        self.delay.write().insert(key.to_string(), by);
        self
    }

    /// Request log, in call order, as `"GET /path"` / `"POST /path"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().clone()
    }

    async fn maybe_delay(&self, haystack: &str) {
        let wait = self
            .delay
            .read()
            .iter()
            .find(|(key, _)| haystack.contains(key.as_str()))
            .map(|(_, d)| *d);
        if let Some(d) = wait {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn get_json(&self, path: &str) -> ApiResult<Value> {
        self.calls.write().push(format!("GET {path}"));
        let route = path.split('?').next().unwrap_or(path);
        self.maybe_delay(route).await;
        self.gets
            .read()
            .get(route)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::Status { status: 404, body: format!("no route for {route}") }))
    }

    async fn post_json(&self, path: &str, body: &Value) -> ApiResult<Value> {
        self.calls.write().push(format!("POST {path}"));
        let haystack = body.to_string();
        self.maybe_delay(&haystack).await;
        self.posts
            .read()
            .iter()
            .find(|(key, _)| haystack.contains(key.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Err(ApiError::Status { status: 404, body: format!("no route for POST {path}") }))
    }
}
