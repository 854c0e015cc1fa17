//! The Notion tools exposed to agents.
//!
//! Each tool parses its params, makes its Notion call(s) and shapes the
//! payload. Authorization is not their concern: the gate only calls
//! `perform` with a usable credential.

use crate::client::{NotionClient, MAX_PAGE_SIZE};
use async_trait::async_trait;
use pagegate::credentials::CredentialSet;
use pagegate::operation::OperationRegistry;
use pagegate::{Operation, UpstreamFailure};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Registry holding all five Notion tools.
pub fn notion_operations(client: Arc<NotionClient>) -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry.register(Arc::new(CreatePage::new(Arc::clone(&client))));
    registry.register(Arc::new(RetrievePage::new(Arc::clone(&client))));
    registry.register(Arc::new(UpdatePage::new(Arc::clone(&client))));
    registry.register(Arc::new(GetAllPages::new(Arc::clone(&client))));
    registry.register(Arc::new(UpdateContent::new(client)));
    registry
}

fn parse_params<P: DeserializeOwned>(params: Value) -> Result<P, UpstreamFailure> {
    serde_json::from_value(params).map_err(UpstreamFailure::invalid_params)
}

fn require_id(field: &str, value: &str) -> Result<(), UpstreamFailure> {
    if value.trim().is_empty() {
        return Err(UpstreamFailure::invalid_params(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Move `field` out of a Notion response object, leaving null behind.
fn take_field(response: &mut Value, field: &str) -> Value {
    response.get_mut(field).map(Value::take).unwrap_or(Value::Null)
}

/// First plain-text fragment of a page's title property, or "Untitled".
pub fn page_title(page: &Value) -> String {
    page["properties"]["title"]["title"][0]["plain_text"]
        .as_str()
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

macro_rules! notion_operation {
    ($name:ident) => {
        pub struct $name {
            client: Arc<NotionClient>,
        }

        impl $name {
            pub fn new(client: Arc<NotionClient>) -> Self {
                Self { client }
            }
        }
    };
}

notion_operation!(CreatePage);
notion_operation!(RetrievePage);
notion_operation!(UpdatePage);
notion_operation!(GetAllPages);
notion_operation!(UpdateContent);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePageParams {
    /// The ID of the parent page
    parent_page_id: String,
    /// The title of the new page
    title: String,
}

#[async_trait]
impl Operation for CreatePage {
    fn name(&self) -> &str {
        "create-page"
    }

    fn description(&self) -> &str {
        "Creates a new page in Notion under a specified parent page"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        let params: CreatePageParams = parse_params(params)?;
        require_id("parentPageId", &params.parent_page_id)?;

        tracing::debug!(title = %params.title, "Creating page");
        self.client
            .create_page(&credentials.access_token, &params.parent_page_id, &params.title)
            .await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievePageParams {
    page_id: String,
}

#[async_trait]
impl Operation for RetrievePage {
    fn name(&self) -> &str {
        "retrieve-page"
    }

    fn description(&self) -> &str {
        "Retrieves a specific page from Notion by ID, with its first 100 blocks"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        let params: RetrievePageParams = parse_params(params)?;
        require_id("pageId", &params.page_id)?;

        let token = &credentials.access_token;
        let page = self.client.retrieve_page(token, &params.page_id).await?;
        let mut blocks = self
            .client
            .list_block_children(token, &params.page_id, MAX_PAGE_SIZE)
            .await?;

        Ok(json!({
            "title": page_title(&page),
            "page": page,
            "blocks": take_field(&mut blocks, "results"),
        }))
    }
}

/// Page icon (emoji only)
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Icon {
    Emoji { emoji: String },
}

#[derive(Deserialize)]
struct ExternalFile {
    url: String,
}

/// Page cover (external image only)
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Cover {
    External { external: ExternalFile },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePageParams {
    page_id: String,
    /// The properties to update, in Notion's property-value shape
    #[serde(default)]
    properties: Map<String, Value>,
    archived: Option<bool>,
    icon: Option<Icon>,
    cover: Option<Cover>,
}

impl UpdatePageParams {
    fn into_body(self) -> Value {
        let mut body = json!({ "properties": self.properties });
        if let Some(archived) = self.archived {
            body["archived"] = json!(archived);
        }
        if let Some(Icon::Emoji { emoji }) = self.icon {
            body["icon"] = json!({ "type": "emoji", "emoji": emoji });
        }
        if let Some(Cover::External { external }) = self.cover {
            body["cover"] = json!({ "type": "external", "external": { "url": external.url } });
        }
        body
    }
}

#[async_trait]
impl Operation for UpdatePage {
    fn name(&self) -> &str {
        "update-page"
    }

    fn description(&self) -> &str {
        "Updates properties of an existing page in Notion"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        let params: UpdatePageParams = parse_params(params)?;
        require_id("pageId", &params.page_id)?;

        let page_id = params.page_id.clone();
        self.client
            .update_page(&credentials.access_token, &page_id, &params.into_body())
            .await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetAllPagesParams {
    /// Cursor for pagination
    start_cursor: Option<String>,
    /// Number of pages to return per request
    page_size: Option<u32>,
}

#[async_trait]
impl Operation for GetAllPages {
    fn name(&self) -> &str {
        "get-all-pages"
    }

    fn description(&self) -> &str {
        "Retrieves all pages accessible to the integration"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        let params: GetAllPagesParams = parse_params(params)?;
        let page_size = params.page_size.unwrap_or(MAX_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(UpstreamFailure::invalid_params(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let mut response = self
            .client
            .search_pages(
                &credentials.access_token,
                params.start_cursor.as_deref(),
                page_size,
            )
            .await?;

        let pages = take_field(&mut response, "results");
        let summaries: Vec<Value> = pages
            .as_array()
            .map(|pages| {
                pages
                    .iter()
                    .map(|page| {
                        json!({
                            "id": page["id"],
                            "title": page_title(page),
                            "created": page["created_time"],
                            "lastEdited": page["last_edited_time"],
                            "url": page["url"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "pages": pages,
            "summaries": summaries,
            "next_cursor": take_field(&mut response, "next_cursor"),
            "has_more": response["has_more"].as_bool().unwrap_or(false),
        }))
    }
}

#[derive(Deserialize)]
struct ContentItem {
    /// Block type (paragraph, heading_1, bulleted_list_item, ...)
    #[serde(rename = "type")]
    block_type: String,
    text: String,
}

impl ContentItem {
    fn into_block(self) -> Value {
        let mut block = Map::new();
        block.insert("object".to_string(), json!("block"));
        block.insert("type".to_string(), json!(self.block_type));
        block.insert(
            self.block_type,
            json!({
                "rich_text": [{ "type": "text", "text": { "content": self.text } }]
            }),
        );
        Value::Object(block)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateContentParams {
    page_id: String,
    /// Blocks to append to the page
    content: Vec<ContentItem>,
}

#[async_trait]
impl Operation for UpdateContent {
    fn name(&self) -> &str {
        "update-content"
    }

    fn description(&self) -> &str {
        "Appends content blocks to an existing Notion page"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        let params: UpdateContentParams = parse_params(params)?;
        require_id("pageId", &params.page_id)?;
        if params.content.iter().any(|item| item.block_type.trim().is_empty()) {
            return Err(UpstreamFailure::invalid_params("block type must not be empty"));
        }

        let blocks = params
            .content
            .into_iter()
            .map(ContentItem::into_block)
            .collect();
        self.client
            .append_blocks(&credentials.access_token, &params.page_id, blocks)
            .await
    }
}
