use anyhow::{Context, Result};
use pagegate::{UpstreamFailure, UpstreamKind};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use urlencoding::encode;

pub const BASE_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

/// Notion's largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Notion error body (`{"object": "error", ...}`).
#[derive(Debug, Deserialize)]
struct NotionError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for the Notion REST API.
///
/// Shared by every agent; the access token is supplied per call.
pub struct NotionClient {
    http_client: Client,
    base_url: String,
}

impl NotionClient {
    /// Create a client using the default Notion API base URL.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(BASE_URL.to_string(), timeout)
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(base_url: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("pagegate-notion/1.0")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a page under a parent page.
    pub async fn create_page(
        &self,
        access_token: &str,
        parent_page_id: &str,
        title: &str,
    ) -> Result<Value, UpstreamFailure> {
        let body = json!({
            "parent": { "page_id": parent_page_id },
            "properties": {
                "title": {
                    "title": [{ "text": { "content": title } }]
                }
            }
        });
        let url = format!("{}/pages", self.base_url);
        self.send(self.http_client.post(&url).json(&body), access_token)
            .await
    }

    /// Retrieve a page object.
    pub async fn retrieve_page(
        &self,
        access_token: &str,
        page_id: &str,
    ) -> Result<Value, UpstreamFailure> {
        let url = format!("{}/pages/{}", self.base_url, encode(page_id));
        self.send(self.http_client.get(&url), access_token).await
    }

    /// List the first `page_size` child blocks of a block (or page).
    pub async fn list_block_children(
        &self,
        access_token: &str,
        block_id: &str,
        page_size: u32,
    ) -> Result<Value, UpstreamFailure> {
        let url = format!(
            "{}/blocks/{}/children?page_size={}",
            self.base_url,
            encode(block_id),
            page_size
        );
        self.send(self.http_client.get(&url), access_token).await
    }

    /// Patch a page. `body` is the Notion update object (properties, archived, icon, cover).
    pub async fn update_page(
        &self,
        access_token: &str,
        page_id: &str,
        body: &Value,
    ) -> Result<Value, UpstreamFailure> {
        let url = format!("{}/pages/{}", self.base_url, encode(page_id));
        self.send(self.http_client.patch(&url).json(body), access_token)
            .await
    }

    /// Search pages shared with the integration.
    pub async fn search_pages(
        &self,
        access_token: &str,
        start_cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Value, UpstreamFailure> {
        let mut body = json!({
            "filter": { "property": "object", "value": "page" },
            "page_size": page_size
        });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        let url = format!("{}/search", self.base_url);
        self.send(self.http_client.post(&url).json(&body), access_token)
            .await
    }

    /// Append child blocks to a block (or page).
    pub async fn append_blocks(
        &self,
        access_token: &str,
        block_id: &str,
        children: Vec<Value>,
    ) -> Result<Value, UpstreamFailure> {
        let url = format!("{}/blocks/{}/children", self.base_url, encode(block_id));
        let body = json!({ "children": children });
        self.send(self.http_client.patch(&url).json(&body), access_token)
            .await
    }

    async fn send(
        &self,
        request: RequestBuilder,
        access_token: &str,
    ) -> Result<Value, UpstreamFailure> {
        let response = request
            .bearer_auth(access_token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_response(status, &body));
        }

        response.json::<Value>().await.map_err(|e| {
            UpstreamFailure::new(
                UpstreamKind::Other,
                format!("Failed to parse Notion response: {}", e),
            )
            .with_status(status.as_u16())
        })
    }
}

/// Map a non-2xx Notion response to a classified failure.
///
/// Notion's `code` is authoritative; the HTTP status is the fallback.
fn classify_error_response(status: StatusCode, body: &str) -> UpstreamFailure {
    let error = serde_json::from_str::<NotionError>(body).ok();

    let kind = match error.as_ref().map(|e| e.code.as_str()) {
        Some("invalid_json" | "invalid_request_url" | "invalid_request" | "validation_error"
            | "missing_version") => UpstreamKind::Validation,
        Some("unauthorized") => UpstreamKind::Unauthorized,
        Some("restricted_resource") => UpstreamKind::Permission,
        Some("object_not_found") => UpstreamKind::NotFound,
        Some("conflict_error") => UpstreamKind::Conflict,
        Some("rate_limited") => UpstreamKind::RateLimited,
        Some(
            "internal_server_error"
            | "service_unavailable"
            | "database_connection_unavailable"
            | "gateway_timeout",
        ) => UpstreamKind::Unavailable,
        _ => match status {
            StatusCode::BAD_REQUEST => UpstreamKind::Validation,
            StatusCode::UNAUTHORIZED => UpstreamKind::Unauthorized,
            StatusCode::FORBIDDEN => UpstreamKind::Permission,
            StatusCode::NOT_FOUND => UpstreamKind::NotFound,
            StatusCode::CONFLICT => UpstreamKind::Conflict,
            StatusCode::TOO_MANY_REQUESTS => UpstreamKind::RateLimited,
            s if s.is_server_error() => UpstreamKind::Unavailable,
            _ => UpstreamKind::Other,
        },
    };

    let message = match error {
        Some(e) if !e.message.is_empty() => e.message,
        _ => format!("Notion API error: {}", status),
    };

    UpstreamFailure::new(kind, message).with_status(status.as_u16())
}

fn classify_transport_error(e: reqwest::Error) -> UpstreamFailure {
    let kind = if e.is_timeout() {
        UpstreamKind::Timeout
    } else {
        UpstreamKind::Network
    };
    UpstreamFailure::new(kind, format!("Notion request failed: {}", e))
}
