use crate::error::IngestError;
use crate::models::{
    Category, CategoryStats, DedupEntry, NormalizedVideo, ProcessingStatus, StatusField,
    VideoRecord,
};
use crate::services::category_registry::CategoryRegistry;
use crate::services::storage::{DedupIndex, VideoStore};
use chrono::{DateTime, Utc};
use elasticsearch::http::response::Response;
use elasticsearch::params::Refresh;
use elasticsearch::{
    indices::IndicesCreateParts, CreateParts, Elasticsearch, MgetParts, SearchParts, UpdateParts,
};
use log::{error, info};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const DEDUP_INDEX: &str = "processed_videos";
pub const SEQUENCE_INDEX: &str = "ingest_sequences";

/// Page size for full-collection scans.
pub const SCAN_PAGE_SIZE: usize = 1000;
const RETRY_ON_CONFLICT: i64 = 10;

const RECORD_MEMBERSHIP_SCRIPT: &str = "\
if (!ctx._source.categories.contains(params.category)) { \
  ctx._source.categories.add(params.category); \
  ctx._source.updated_at = params.now; \
} else { \
  ctx.op = 'noop'; \
}";

pub fn video_index_body() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "video_id": { "type": "keyword" },
                "title": { "type": "text" },
                "channel_name": { "type": "keyword" },
                "view_count": { "type": "long" },
                "channel_subscriber_count": { "type": "long" },
                "duration": { "type": "keyword" },
                "summary_status": { "type": "keyword" },
                "commented_status": { "type": "keyword" },
                "date_added": { "type": "date" }
            }
        }
    })
}

pub fn dedup_index_body() -> Value {
    json!({
        "mappings": {
            "properties": {
                "video_id": { "type": "keyword" },
                "categories": { "type": "keyword" },
                "first_added_to_category": { "type": "keyword" },
                "date_added": { "type": "date" },
                "updated_at": { "type": "date" }
            }
        }
    })
}

fn sequence_index_body() -> Value {
    json!({
        "mappings": {
            "properties": {
                "value": { "type": "long" }
            }
        }
    })
}

/// Upsert the ledger row for `video_id`: create it with `category` as the
/// first category, or append `category` to an existing row.
pub fn membership_update_body(video_id: &str, category: &str, now: DateTime<Utc>) -> Value {
    json!({
        "script": {
            "source": RECORD_MEMBERSHIP_SCRIPT,
            "lang": "painless",
            "params": {
                "category": category,
                "now": now
            }
        },
        "upsert": DedupEntry::first(video_id, category, now)
    })
}

fn by_views_sort() -> Value {
    json!([
        { "view_count": { "order": "desc" } },
        { "id": { "order": "asc" } }
    ])
}

pub fn top_by_views_query(limit: usize) -> Value {
    json!({
        "size": limit,
        "query": { "match_all": {} },
        "sort": by_views_sort()
    })
}

pub fn next_pending_query(field: StatusField) -> Value {
    let mut term = Map::new();
    term.insert(
        field.as_str().to_string(),
        json!(ProcessingStatus::Pending.as_str()),
    );

    json!({
        "size": 1,
        "query": { "term": term },
        "sort": by_views_sort()
    })
}

fn status_filter(field: StatusField, value: ProcessingStatus) -> Value {
    let mut term = Map::new();
    term.insert(field.as_str().to_string(), json!(value.as_str()));
    json!({ "filter": { "term": term } })
}

pub fn stats_query() -> Value {
    json!({
        "size": 0,
        "track_total_hits": true,
        "query": { "match_all": {} },
        "aggs": {
            "pending_summary": status_filter(StatusField::SummaryStatus, ProcessingStatus::Pending),
            "completed_summary": status_filter(StatusField::SummaryStatus, ProcessingStatus::Completed),
            "pending_comments": status_filter(StatusField::CommentedStatus, ProcessingStatus::Pending),
            "completed_comments": status_filter(StatusField::CommentedStatus, ProcessingStatus::Completed),
            "avg_views": { "avg": { "field": "view_count" } },
            "max_views": { "max": { "field": "view_count" } }
        }
    })
}

pub fn parse_stats(response: &Value) -> CategoryStats {
    let aggs = &response["aggregations"];
    let doc_count = |name: &str| aggs[name]["doc_count"].as_u64().unwrap_or(0);

    CategoryStats {
        total: response["hits"]["total"]["value"].as_u64().unwrap_or(0),
        pending_summary: doc_count("pending_summary"),
        completed_summary: doc_count("completed_summary"),
        pending_comments: doc_count("pending_comments"),
        completed_comments: doc_count("completed_comments"),
        // Both are null on an empty index.
        avg_views: aggs["avg_views"]["value"].as_f64().unwrap_or(0.0),
        max_views: aggs["max_views"]["value"].as_f64().unwrap_or(0.0) as u64,
    }
}

/// One page of a full scan. Pages are keyed on the unique `video_id`, so
/// `search_after` neither skips nor repeats documents between pages.
pub fn scan_page_query(after: Option<&str>, with_source: bool) -> Value {
    let mut query = json!({
        "size": SCAN_PAGE_SIZE,
        "query": { "match_all": {} },
        "sort": [{ "video_id": { "order": "asc" } }],
        "_source": with_source,
        "track_total_hits": false
    });
    if let Some(after) = after {
        query["search_after"] = json!([after]);
    }
    query
}

/// Cursor for the page after `response`, or `None` once a short page ends the scan.
pub fn next_scan_cursor(response: &Value) -> Option<String> {
    let hits = response["hits"]["hits"].as_array()?;
    if hits.len() < SCAN_PAGE_SIZE {
        return None;
    }
    hits.last()?["sort"][0].as_str().map(String::from)
}

/// Deserialize every `_source` in a search response, logging rows that do not fit the schema.
pub fn hit_sources<T: DeserializeOwned>(response: &Value) -> Vec<T> {
    let mut items = Vec::new();

    if let Some(hits) = response["hits"]["hits"].as_array() {
        for hit in hits {
            match serde_json::from_value::<T>(hit["_source"].clone()) {
                Ok(item) => items.push(item),
                Err(e) => error!("Skipping malformed document {:?}: {e}", hit["_id"]),
            }
        }
    }
    items
}

pub fn parse_mget_entries(response: &Value) -> HashMap<String, DedupEntry> {
    let mut entries = HashMap::new();

    if let Some(docs) = response["docs"].as_array() {
        for doc in docs {
            if !doc["found"].as_bool().unwrap_or(false) {
                continue;
            }
            match serde_json::from_value::<DedupEntry>(doc["_source"].clone()) {
                Ok(entry) => {
                    entries.insert(entry.video_id.clone(), entry);
                }
                Err(e) => error!("Skipping malformed ledger entry {:?}: {e}", doc["_id"]),
            }
        }
    }
    entries
}

async fn read_json(response: Response, context: &str) -> Result<Value, IngestError> {
    let status = response.status_code();
    if !status.is_success() {
        let response_text = response.text().await.unwrap_or_default();
        return Err(IngestError::Storage(format!(
            "{context} failed with status {status}: {response_text}"
        )));
    }
    Ok(response.json::<Value>().await?)
}

/// Elasticsearch backend: one index per category plus the `processed_videos` ledger.
#[derive(Clone)]
pub struct EsStore {
    client: Elasticsearch,
}

impl EsStore {
    pub fn new(client: Elasticsearch) -> Self {
        Self { client }
    }

    pub async fn ensure_indices(&self, registry: &CategoryRegistry) -> Result<(), IngestError> {
        for category in registry.all() {
            self.create_index(&category.collection, video_index_body())
                .await?;
        }
        self.create_index(DEDUP_INDEX, dedup_index_body()).await?;
        self.create_index(SEQUENCE_INDEX, sequence_index_body())
            .await
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<(), IngestError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await?;

        if response.status_code().is_success() {
            info!("Elasticsearch index '{index}' created.");
            return Ok(());
        }

        let response_text = response.text().await.unwrap_or_default();
        if response_text.contains("resource_already_exists_exception") {
            info!("Elasticsearch index '{index}' already exists.");
            Ok(())
        } else {
            Err(IngestError::Storage(format!(
                "Failed to create Elasticsearch index '{index}': {response_text}"
            )))
        }
    }

    /// Atomically increments the per-collection counter that backs surrogate ids.
    async fn next_id(&self, collection: &str) -> Result<u64, IngestError> {
        let response = self
            .client
            .update(UpdateParts::IndexId(SEQUENCE_INDEX, collection))
            .retry_on_conflict(RETRY_ON_CONFLICT)
            ._source(&["value"])
            .body(json!({
                "script": { "source": "ctx._source.value += 1", "lang": "painless" },
                "upsert": { "value": 1 }
            }))
            .send()
            .await?;

        let body = read_json(response, "Sequence update").await?;
        body["get"]["_source"]["value"].as_u64().ok_or_else(|| {
            IngestError::Storage(format!("Sequence for {collection} returned no value"))
        })
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, IngestError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;
        read_json(response, "Elasticsearch search").await
    }

    /// Every page of `index`, in `video_id` order.
    async fn scan(&self, index: &str, with_source: bool) -> Result<Vec<Value>, IngestError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .search(index, scan_page_query(cursor.as_deref(), with_source))
                .await?;
            cursor = next_scan_cursor(&page);
            pages.push(page);
            if cursor.is_none() {
                break;
            }
        }
        Ok(pages)
    }
}

#[rocket::async_trait]
impl VideoStore for EsStore {
    async fn insert(
        &self,
        category: &Category,
        video: &NormalizedVideo,
    ) -> Result<VideoRecord, IngestError> {
        let id = self.next_id(&category.collection).await?;
        let record = VideoRecord::new(id, video, Utc::now());

        // The document id is the video id, so `create` is the uniqueness gate.
        // `wait_for` makes the row visible before the ledger is touched.
        let response = self
            .client
            .create(CreateParts::IndexId(&category.collection, &record.video_id))
            .refresh(Refresh::WaitFor)
            .body(json!(record))
            .send()
            .await?;

        let status = response.status_code();
        if status.is_success() {
            return Ok(record);
        }
        if status.as_u16() == 409 {
            return Err(IngestError::AlreadyExists {
                category: category.id.clone(),
                video_id: record.video_id,
            });
        }

        let response_text = response.text().await.unwrap_or_default();
        Err(IngestError::Storage(format!(
            "Failed to index video {} into {}: {response_text}",
            record.video_id, category.collection
        )))
    }

    async fn list_top_by_views(
        &self,
        category: &Category,
        limit: usize,
    ) -> Result<Vec<VideoRecord>, IngestError> {
        let response = self
            .search(&category.collection, top_by_views_query(limit))
            .await?;
        Ok(hit_sources(&response))
    }

    async fn stats(&self, category: &Category) -> Result<CategoryStats, IngestError> {
        let response = self.search(&category.collection, stats_query()).await?;
        Ok(parse_stats(&response))
    }

    async fn update_status(
        &self,
        category: &Category,
        video_id: &str,
        field: StatusField,
        value: ProcessingStatus,
    ) -> Result<(), IngestError> {
        let mut doc = Map::new();
        doc.insert(field.as_str().to_string(), json!(value));

        let response = self
            .client
            .update(UpdateParts::IndexId(&category.collection, video_id))
            .refresh(Refresh::WaitFor)
            .body(json!({ "doc": doc }))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(IngestError::NotFound(format!(
                "Video {video_id} not found in category {}",
                category.id
            )));
        }
        read_json(response, "Status update").await.map(|_| ())
    }

    async fn next_pending(
        &self,
        category: &Category,
        field: StatusField,
    ) -> Result<Option<VideoRecord>, IngestError> {
        let response = self
            .search(&category.collection, next_pending_query(field))
            .await?;
        Ok(hit_sources::<VideoRecord>(&response).into_iter().next())
    }

    async fn video_ids(&self, category: &Category) -> Result<Vec<String>, IngestError> {
        let mut video_ids = Vec::new();
        for page in self.scan(&category.collection, false).await? {
            if let Some(hits) = page["hits"]["hits"].as_array() {
                video_ids.extend(
                    hits.iter()
                        .filter_map(|hit| hit["_id"].as_str())
                        .map(String::from),
                );
            }
        }
        Ok(video_ids)
    }
}

#[rocket::async_trait]
impl DedupIndex for EsStore {
    async fn check_duplicates(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, DedupEntry>, IngestError> {
        if video_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .client
            .mget(MgetParts::Index(DEDUP_INDEX))
            .body(json!({ "ids": video_ids }))
            .send()
            .await?;

        let body = read_json(response, "Duplicate lookup").await?;
        Ok(parse_mget_entries(&body))
    }

    async fn record_membership(&self, video_id: &str, category: &str) -> Result<(), IngestError> {
        // A single-document update is atomic; conflicting writers are retried server side.
        let response = self
            .client
            .update(UpdateParts::IndexId(DEDUP_INDEX, video_id))
            .retry_on_conflict(RETRY_ON_CONFLICT)
            .refresh(Refresh::WaitFor)
            .body(membership_update_body(video_id, category, Utc::now()))
            .send()
            .await?;

        read_json(response, "Ledger update").await.map(|_| ())
    }

    async fn entries(&self) -> Result<Vec<DedupEntry>, IngestError> {
        let mut entries = Vec::new();
        for page in self.scan(DEDUP_INDEX, true).await? {
            entries.extend(hit_sources::<DedupEntry>(&page));
        }
        Ok(entries)
    }
}
