//! Typed view of the backlog REST surface.
//!
//! - `GET  {base}/list/{collection}/task?page=n&include_closed=b&subtasks=b`
//! - `POST {base}/list/{collection}/task`
//! - `GET|PUT|DELETE {base}/task/{id}`

use crate::client::{ClientError, RateLimitedClient, RequestStatistics};
use crate::env;
use crate::remote::fetcher::FetchOptions;
use crate::remote::types::{ItemChanges, ItemId, ItemPage, NewItem, RemoteItem};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub struct BacklogApi {
    client: RateLimitedClient,
    base_url: Url,
    collection_id: String,
}

impl BacklogApi {
    pub fn new(
        client: RateLimitedClient,
        base_url: Url,
        collection_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidRequest(format!(
                "base URL {} cannot carry path segments",
                base_url
            )));
        }

        let collection_id = collection_id.into();
        if collection_id.trim().is_empty() {
            return Err(ClientError::InvalidRequest(
                "collection id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client,
            base_url,
            collection_id,
        })
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    pub async fn statistics(&self) -> RequestStatistics {
        self.client.statistics().await
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::InvalidRequest(format!("invalid base URL {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self) -> Result<Url, ClientError> {
        self.url(&[
            env::api::COLLECTION_SEGMENT,
            &self.collection_id,
            env::api::ITEM_SEGMENT,
        ])
    }

    fn item_url(&self, id: &str) -> Result<Url, ClientError> {
        if id.trim().is_empty() {
            return Err(ClientError::InvalidRequest(
                "item id must not be empty".to_string(),
            ));
        }
        self.url(&[env::api::ITEM_SEGMENT, id])
    }

    fn decode_item(url: &Url, value: Option<Value>) -> Result<RemoteItem, ClientError> {
        let value = value.ok_or_else(|| ClientError::MalformedResponse {
            url: url.to_string(),
            message: "expected an item, got an empty body".to_string(),
        })?;

        RemoteItem::from_wire(value).map_err(|e| ClientError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Fetch page `page` (0-based) of the collection
    pub async fn list_page(&self, page: u32, options: &FetchOptions) -> Result<ItemPage, ClientError> {
        let mut url = self.collection_url()?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("include_closed", &options.include_closed.to_string())
            .append_pair("subtasks", &options.include_subtasks.to_string());

        let body = self.client.get(url.clone()).await?;
        let body = body.unwrap_or(Value::Null);

        let raw_items = match body.get("items").or_else(|| body.get("tasks")) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ClientError::MalformedResponse {
                    url: url.to_string(),
                    message: format!("expected an item array, got {}", other),
                });
            }
        };

        let items = raw_items
            .into_iter()
            .map(RemoteItem::from_wire)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ClientError::MalformedResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let last_page = body.get("last_page").and_then(Value::as_bool);
        debug!(
            "Page {} of collection {}: {} items (last_page: {:?})",
            page,
            self.collection_id,
            items.len(),
            last_page
        );

        Ok(ItemPage { items, last_page })
    }

    pub async fn get_item(&self, id: &str) -> Result<RemoteItem, ClientError> {
        let url = self.item_url(id)?;
        let body = self.client.get(url.clone()).await?;
        Self::decode_item(&url, body)
    }

    /// Create an item; the response carries the newly minted id
    pub async fn create_item(&self, item: &NewItem) -> Result<RemoteItem, ClientError> {
        let url = self.collection_url()?;
        let payload = serde_json::to_value(item)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let body = self.client.post(url.clone(), payload).await?;
        Self::decode_item(&url, body)
    }

    /// Apply a partial update. Returns the updated item when the server echoes it.
    pub async fn update_item(
        &self,
        id: &ItemId,
        changes: &ItemChanges,
    ) -> Result<Option<RemoteItem>, ClientError> {
        let url = self.item_url(id)?;
        let payload = serde_json::to_value(changes)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        match self.client.put(url.clone(), payload).await? {
            Some(value) => Self::decode_item(&url, Some(value)).map(Some),
            None => Ok(None),
        }
    }

    pub async fn delete_item(&self, id: &ItemId) -> Result<(), ClientError> {
        let url = self.item_url(id)?;
        self.client.delete(url).await?;
        Ok(())
    }
}
