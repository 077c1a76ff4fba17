//! Credentialed HTTP access to the platform REST and GraphQL endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Maximum number of characters of an upstream error body kept in [`ApiError`].
pub const BODY_SNIPPET_LEN: usize = 512;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("platform API error: {0}")]
    Api(String),
}

impl ApiError {
    /// Upstream HTTP status, when the failure came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The narrow client the core consumes. Implementations authenticate every
/// request and return the decoded JSON body.
#[async_trait]
pub trait PlatformClient: Send + Sync + std::fmt::Debug {
    async fn get_json(&self, path: &str) -> ApiResult<Value>;
    async fn post_json(&self, path: &str, body: &Value) -> ApiResult<Value>;
}

// ─── reqwest implementation ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl HttpPlatformClient {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ApiResult<Value> {
        let resp = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_json(&self, path: &str) -> ApiResult<Value> {
        debug!(path, "GET");
        self.send(self.client.get(self.url(path))).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> ApiResult<Value> {
        debug!(path, "POST");
        self.send(self.client.post(self.url(path)).json(body)).await
    }
}

fn classify_reqwest(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_decode() {
        ApiError::Decode(e.to_string())
    } else {
        ApiError::Transport(e.to_string())
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

// ─── REST envelope ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultInfo {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub count: Option<u32>,
}

/// One page of a REST listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub result: Value,
    pub result_info: Option<ResultInfo>,
}

impl Page {
    /// True when the listing reports further pages after `page`.
    pub fn has_more(&self, page: u32) -> bool {
        self.result_info
            .as_ref()
            .and_then(|i| i.total_pages)
            .is_some_and(|total| page < total)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    errors: Vec<EnvelopeError>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

fn default_success() -> bool {
    true
}

/// Unwrap `{success, errors, result, result_info}`.
pub fn unwrap_envelope(body: Value) -> ApiResult<Page> {
    let envelope: Envelope =
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    if !envelope.success {
        let message = envelope
            .errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("{code}: {}", e.message),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::Api(if message.is_empty() {
            "request unsuccessful".to_string()
        } else {
            message
        }));
    }

    let result = envelope
        .result
        .ok_or_else(|| ApiError::Decode("missing result".to_string()))?;

    Ok(Page {
        result,
        result_info: envelope.result_info,
    })
}
