use crate::client::types::{HttpMethod, HttpRequest, HttpResponse, TransportError};
use crate::client::{ClientConfig, ClientError, RateLimitedClient, Transport};
use crate::env;
use crate::remote::BacklogApi;
use crate::remote::types::{ItemId, ItemStatus, Priority, RemoteItem, StatusKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// Base URL used by [`InMemoryBacklog::api`]
pub const TEST_BASE_URL: &str = "http://backlog.test/api/v2";

/// Request seen by the in-memory service
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct BacklogState {
    collection_id: String,
    items: Vec<RemoteItem>,
    next_id: u64,
    page_size: usize,
    /// Served before routing, one per request
    scripted: VecDeque<HttpResponse>,
    /// Item id → status returned for every request touching it
    failing_items: HashMap<ItemId, u16>,
    /// Item name → status returned for creates of that name
    failing_creates: HashMap<String, u16>,
    requests: Vec<RecordedRequest>,
}

/// In-memory implementation of the backlog REST surface.
///
/// Serves paged listings with a `last_page` flag, creates with fresh ids,
/// partial updates, and cascading deletes. Failures can be scripted per
/// request, per item or per created name. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryBacklog {
    state: Arc<Mutex<BacklogState>>,
}

impl InMemoryBacklog {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BacklogState {
                collection_id: collection_id.into(),
                page_size: 100,
                next_id: 1,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BacklogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size.max(1);
        self
    }

    pub fn with_items(self, items: impl IntoIterator<Item = RemoteItem>) -> Self {
        self.lock().items.extend(items);
        self
    }

    pub fn insert(&self, item: RemoteItem) {
        self.lock().items.push(item);
    }

    /// Current contents in storage order
    pub fn items(&self) -> Vec<RemoteItem> {
        self.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<RemoteItem> {
        self.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Vec<RemoteItem> {
        self.lock()
            .items
            .iter()
            .filter(|item| item.name == name)
            .cloned()
            .collect()
    }

    /// Serve `response` to the next request instead of routing it
    pub fn push_response(&self, response: HttpResponse) {
        self.lock().scripted.push_back(response);
    }

    /// Serve `count` rate-limit responses carrying `Retry-After: retry_after`
    pub fn push_rate_limits(&self, count: usize, retry_after: u64) {
        let mut state = self.lock();
        for _ in 0..count {
            state.scripted.push_back(
                HttpResponse::new(429, r#"{"err":"Rate limit reached"}"#)
                    .with_header("Retry-After", retry_after.to_string()),
            );
        }
    }

    /// Answer every request that touches `id` with `status`
    pub fn fail_item(&self, id: impl Into<ItemId>, status: u16) {
        self.lock().failing_items.insert(id.into(), status);
    }

    /// Answer every create of an item named `name` with `status`
    pub fn fail_create(&self, name: impl Into<String>, status: u16) {
        self.lock().failing_creates.insert(name.into(), status);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Client whose transport is this service
    pub fn client(&self, config: ClientConfig) -> RateLimitedClient {
        RateLimitedClient::new(Arc::new(self.clone()), config)
    }

    /// API bound to this service's collection with the default client config
    pub fn api(&self) -> Result<BacklogApi, ClientError> {
        self.api_with(ClientConfig::default())
    }

    pub fn api_with(&self, config: ClientConfig) -> Result<BacklogApi, ClientError> {
        let base_url = Url::parse(TEST_BASE_URL)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let collection_id = self.lock().collection_id.clone();
        BacklogApi::new(self.client(config), base_url, collection_id)
    }
}

#[async_trait]
impl Transport for InMemoryBacklog {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: request.method,
            path: request.url.path().to_string(),
            query: request.url.query().map(str::to_string),
            body: request.body.clone(),
        });

        if let Some(response) = state.scripted.pop_front() {
            return Ok(response);
        }

        Ok(state.route(request))
    }
}

enum Route {
    Collection(String),
    Item(String),
}

fn parse_route(url: &Url) -> Option<Route> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., collection, id, item] if *collection == env::api::COLLECTION_SEGMENT && *item == env::api::ITEM_SEGMENT => {
            Some(Route::Collection((*id).to_string()))
        }
        [.., item, id] if *item == env::api::ITEM_SEGMENT => Some(Route::Item((*id).to_string())),
        _ => None,
    }
}

fn error_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse::new(status, json!({ "err": message }).to_string())
}

fn kind_label(kind: StatusKind) -> &'static str {
    match kind {
        StatusKind::Open => "open",
        StatusKind::Custom => "custom",
        StatusKind::Done => "done",
        StatusKind::Closed => "closed",
    }
}

/// Render an item in the vendor JSON shape
fn to_wire(item: &RemoteItem) -> Value {
    let priority = item.priority.map(|p| {
        json!({
            "id": p.value().to_string(),
            "priority": match p.value() {
                1 => "urgent",
                2 => "high",
                3 => "normal",
                _ => "low",
            }
        })
    });
    json!({
        "id": item.id,
        "name": item.name,
        "description": item.description,
        "text_content": item.description,
        "status": { "status": item.status.name, "type": kind_label(item.status.kind) },
        "tags": item.tags.iter().map(|t| json!({ "name": t })).collect::<Vec<_>>(),
        "priority": priority,
        "parent": item.parent_id,
    })
}

fn parse_priority(value: &Value) -> Result<Option<Priority>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(Priority::new)
            .map(Some)
            .ok_or_else(|| format!("invalid priority {}", n)),
        other => Err(format!("invalid priority {}", other)),
    }
}

fn parse_tags(value: &Value) -> Result<BTreeSet<String>, String> {
    match value {
        Value::Array(tags) => tags
            .iter()
            .map(|tag| {
                tag.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("invalid tag {}", tag))
            })
            .collect(),
        Value::Null => Ok(BTreeSet::new()),
        other => Err(format!("invalid tags {}", other)),
    }
}

impl BacklogState {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn route(&mut self, request: &HttpRequest) -> HttpResponse {
        let Some(route) = parse_route(&request.url) else {
            return error_response(404, "Route not found");
        };

        match (request.method, route) {
            (HttpMethod::Get, Route::Collection(collection)) => self.list(&collection, &request.url),
            (HttpMethod::Post, Route::Collection(collection)) => {
                self.create(&collection, request.body.as_ref())
            }
            (method, Route::Item(id)) => {
                if let Some(status) = self.failing_items.get(&id) {
                    return error_response(*status, "Scripted failure");
                }
                match method {
                    HttpMethod::Get => match self.position(&id) {
                        Some(index) => HttpResponse::new(200, to_wire(&self.items[index]).to_string()),
                        None => error_response(404, "Task not found"),
                    },
                    HttpMethod::Put => self.update(&id, request.body.as_ref()),
                    HttpMethod::Delete => self.delete(&id),
                    HttpMethod::Post => error_response(405, "Method not allowed"),
                }
            }
            _ => error_response(405, "Method not allowed"),
        }
    }

    fn list(&self, collection: &str, url: &Url) -> HttpResponse {
        if collection != self.collection_id {
            return error_response(404, "List not found");
        }

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let page: usize = query
            .get("page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        let include_closed = query.get("include_closed").is_none_or(|v| v == "true");
        let subtasks = query.get("subtasks").is_none_or(|v| v == "true");

        let visible: Vec<&RemoteItem> = self
            .items
            .iter()
            .filter(|item| include_closed || !item.status.is_closed())
            .filter(|item| subtasks || item.parent_id.is_none())
            .collect();

        let start = (page * self.page_size).min(visible.len());
        let end = (start + self.page_size).min(visible.len());
        let tasks: Vec<Value> = visible[start..end].iter().map(|item| to_wire(item)).collect();

        HttpResponse::new(
            200,
            json!({ "tasks": tasks, "last_page": end >= visible.len() }).to_string(),
        )
    }

    fn create(&mut self, collection: &str, body: Option<&Value>) -> HttpResponse {
        if collection != self.collection_id {
            return error_response(404, "List not found");
        }
        let Some(body) = body else {
            return error_response(400, "Body required");
        };
        let Some(name) = body.get("name").and_then(Value::as_str) else {
            return error_response(400, "Task name invalid");
        };
        if let Some(status) = self.failing_creates.get(name) {
            return error_response(*status, "Scripted failure");
        }

        let parent_id = body.get("parent").and_then(Value::as_str).map(str::to_string);
        if let Some(parent) = &parent_id {
            if self.position(parent).is_none() {
                return error_response(400, "Parent task not found");
            }
        }

        let priority = match body.get("priority").map(parse_priority).transpose() {
            Ok(priority) => priority.flatten(),
            Err(message) => return error_response(400, &message),
        };
        let tags = match body.get("tags").map(parse_tags).transpose() {
            Ok(tags) => tags.unwrap_or_default(),
            Err(message) => return error_response(400, &message),
        };
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(|s| ItemStatus::new(s, StatusKind::infer(s)))
            .unwrap_or_default();

        let item = RemoteItem {
            id: format!("item-{}", self.next_id),
            name: name.to_string(),
            description: body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status,
            tags,
            priority,
            parent_id,
        };
        self.next_id += 1;

        let response = HttpResponse::new(200, to_wire(&item).to_string());
        self.items.push(item);
        response
    }

    fn update(&mut self, id: &str, body: Option<&Value>) -> HttpResponse {
        let Some(index) = self.position(id) else {
            return error_response(404, "Task not found");
        };
        let Some(Value::Object(fields)) = body else {
            return error_response(400, "Body required");
        };

        if let Some(Value::String(parent)) = fields.get("parent") {
            if parent == id || self.position(parent).is_none() {
                return error_response(400, "Parent task invalid");
            }
        }

        let mut item = self.items[index].clone();
        for (field, value) in fields {
            match field.as_str() {
                "name" => match value.as_str() {
                    Some(name) => item.name = name.to_string(),
                    None => return error_response(400, "Task name invalid"),
                },
                "description" => item.description = value.as_str().unwrap_or_default().to_string(),
                "status" => match value.as_str() {
                    Some(status) => item.status = ItemStatus::new(status, StatusKind::infer(status)),
                    None => return error_response(400, "Status invalid"),
                },
                "priority" => match parse_priority(value) {
                    Ok(priority) => item.priority = priority,
                    Err(message) => return error_response(400, &message),
                },
                "tags" => match parse_tags(value) {
                    Ok(tags) => item.tags = tags,
                    Err(message) => return error_response(400, &message),
                },
                "parent" => item.parent_id = value.as_str().map(str::to_string),
                _ => {}
            }
        }

        let response = HttpResponse::new(200, to_wire(&item).to_string());
        self.items[index] = item;
        response
    }

    /// Remove `id` and everything below it
    fn delete(&mut self, id: &str) -> HttpResponse {
        if self.position(id).is_none() {
            return error_response(404, "Task not found");
        }

        let mut doomed = BTreeSet::from([id.to_string()]);
        loop {
            let before = doomed.len();
            for item in &self.items {
                if item.parent_id.as_ref().is_some_and(|p| doomed.contains(p)) {
                    doomed.insert(item.id.clone());
                }
            }
            if doomed.len() == before {
                break;
            }
        }

        self.items.retain(|item| !doomed.contains(&item.id));
        HttpResponse::new(204, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::types::{ItemChanges, NewItem};

    fn seeded() -> InMemoryBacklog {
        InMemoryBacklog::new("L1").with_items([
            RemoteItem {
                id: "e1".to_string(),
                name: "Epic".to_string(),
                description: String::new(),
                status: ItemStatus::default(),
                tags: BTreeSet::from(["epic".to_string()]),
                priority: Some(Priority::HIGH),
                parent_id: None,
            },
            RemoteItem {
                id: "s1".to_string(),
                name: "Story".to_string(),
                description: "d".to_string(),
                status: ItemStatus::new("done", StatusKind::Done),
                tags: BTreeSet::new(),
                priority: None,
                parent_id: Some("e1".to_string()),
            },
        ])
    }

    #[tokio::test]
    async fn test_wire_round_trip_through_api() {
        let backlog = seeded();
        let api = backlog.api().unwrap();

        let epic = api.get_item("e1").await.unwrap();
        assert_eq!(epic.priority, Some(Priority::HIGH));
        assert!(epic.tags.contains("epic"));

        let story = api.get_item("s1").await.unwrap();
        assert!(story.status.is_closed());
        assert_eq!(story.parent_id.as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let backlog = seeded();
        let api = backlog.api().unwrap();

        let created = api
            .create_item(&NewItem {
                name: "New".to_string(),
                parent: Some("e1".to_string()),
                tags: vec!["story".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.id, "item-1");
        assert_eq!(backlog.get("item-1").unwrap().parent_id.as_deref(), Some("e1"));

        let updated = api
            .update_item(
                &"item-1".to_string(),
                &ItemChanges {
                    status: Some("Closed".to_string()),
                    parent: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.status.is_closed());
        assert!(updated.is_root());

        // deleting the epic takes its remaining story with it
        api.delete_item(&"e1".to_string()).await.unwrap();
        let ids: Vec<String> = backlog.items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["item-1".to_string()]);
    }

    #[tokio::test]
    async fn test_rejections() {
        let backlog = seeded();
        let api = backlog.api().unwrap();

        let err = api
            .create_item(&NewItem {
                name: "Orphan".to_string(),
                parent: Some("nope".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));

        let err = api.get_item("missing").await.unwrap_err();
        assert_eq!(err.status(), Some(404));

        backlog.fail_item("e1", 403);
        let err = api.delete_item(&"e1".to_string()).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(backlog.get("e1").is_some());
    }

    #[test]
    fn test_route_parsing() {
        let url = Url::parse("http://backlog.test/api/v2/list/L1/task?page=0").unwrap();
        assert!(matches!(parse_route(&url), Some(Route::Collection(c)) if c == "L1"));
        let url = Url::parse("http://backlog.test/api/v2/task/abc").unwrap();
        assert!(matches!(parse_route(&url), Some(Route::Item(id)) if id == "abc"));
        let url = Url::parse("http://backlog.test/other").unwrap();
        assert!(parse_route(&url).is_none());
    }
}
