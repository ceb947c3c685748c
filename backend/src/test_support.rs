//! Fixtures shared by unit and HTTP tests.

use crate::config::{Config, StorageBackend};
use crate::error::IngestError;
use crate::models::{
    Category, CategoryStats, DedupEntry, NormalizedVideo, ProcessingStatus, StatusField,
    VideoRecord,
};
use crate::services::category_registry::CategoryRegistry;
use crate::services::memory_store::MemoryStore;
use crate::services::search_service::{RawSearchPage, SearchQuery, VideoSearchProvider};
use crate::services::storage::{DedupIndex, VideoStore};
use crate::AppState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn video(video_id: &str, view_count: u64) -> NormalizedVideo {
    NormalizedVideo {
        video_id: video_id.to_string(),
        title: format!("Video {video_id}"),
        channel_name: "Test Channel".to_string(),
        view_count,
        channel_subscriber_count: None,
        duration: Some("10:00".to_string()),
    }
}

/// Returns a canned page (or error) and remembers the last query it saw.
pub struct StubSearchProvider {
    page: Option<RawSearchPage>,
    failure: Option<String>,
    last_query: Mutex<Option<SearchQuery>>,
}

impl StubSearchProvider {
    pub fn with_page(page: RawSearchPage) -> Self {
        Self {
            page: Some(page),
            failure: None,
            last_query: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            page: None,
            failure: Some(message.to_string()),
            last_query: Mutex::new(None),
        }
    }

    pub fn last_query(&self) -> Option<SearchQuery> {
        self.last_query.lock().unwrap().clone()
    }
}

#[rocket::async_trait]
impl VideoSearchProvider for StubSearchProvider {
    async fn search(
        &self,
        query: &SearchQuery,
        _timeout: Duration,
    ) -> anyhow::Result<RawSearchPage> {
        *self.last_query.lock().unwrap() = Some(query.clone());
        match (&self.page, &self.failure) {
            (_, Some(message)) => Err(anyhow::anyhow!("{message}")),
            (Some(page), None) => Ok(page.clone()),
            (None, None) => Ok(RawSearchPage::default()),
        }
    }
}

fn injected_failure(video_id: &str) -> IngestError {
    IngestError::Storage(format!("injected failure for {video_id}"))
}

/// Category store whose insert fails for one video id.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_on: String,
}

impl FlakyStore {
    pub fn failing_on(video_id: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on: video_id.to_string(),
        }
    }
}

#[rocket::async_trait]
impl VideoStore for FlakyStore {
    async fn insert(
        &self,
        category: &Category,
        video: &NormalizedVideo,
    ) -> Result<VideoRecord, IngestError> {
        if video.video_id == self.fail_on {
            return Err(injected_failure(&video.video_id));
        }
        self.inner.insert(category, video).await
    }

    async fn list_top_by_views(
        &self,
        category: &Category,
        limit: usize,
    ) -> Result<Vec<VideoRecord>, IngestError> {
        self.inner.list_top_by_views(category, limit).await
    }

    async fn stats(&self, category: &Category) -> Result<CategoryStats, IngestError> {
        self.inner.stats(category).await
    }

    async fn update_status(
        &self,
        category: &Category,
        video_id: &str,
        field: StatusField,
        value: ProcessingStatus,
    ) -> Result<(), IngestError> {
        self.inner
            .update_status(category, video_id, field, value)
            .await
    }

    async fn next_pending(
        &self,
        category: &Category,
        field: StatusField,
    ) -> Result<Option<VideoRecord>, IngestError> {
        self.inner.next_pending(category, field).await
    }

    async fn video_ids(&self, category: &Category) -> Result<Vec<String>, IngestError> {
        self.inner.video_ids(category).await
    }
}

/// Dedup index whose membership write fails for one video id.
pub struct FlakyIndex {
    pub inner: MemoryStore,
    fail_on: String,
}

impl FlakyIndex {
    pub fn failing_on(video_id: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on: video_id.to_string(),
        }
    }
}

#[rocket::async_trait]
impl DedupIndex for FlakyIndex {
    async fn check_duplicates(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, DedupEntry>, IngestError> {
        self.inner.check_duplicates(video_ids).await
    }

    async fn record_membership(&self, video_id: &str, category: &str) -> Result<(), IngestError> {
        if video_id == self.fail_on {
            return Err(injected_failure(video_id));
        }
        self.inner.record_membership(video_id, category).await
    }

    async fn entries(&self) -> Result<Vec<DedupEntry>, IngestError> {
        self.inner.entries().await
    }
}

/// App state over the in-memory backend with a stub search collaborator.
pub fn memory_state(admin_token: Option<&str>, provider: StubSearchProvider) -> AppState {
    let config = Config {
        storage_backend: StorageBackend::Memory,
        admin_token: admin_token.map(String::from),
        ..Config::default()
    };
    let registry = CategoryRegistry::from_names(&config.category_names).unwrap();
    let memory = Arc::new(MemoryStore::new());

    AppState {
        config,
        registry,
        store: memory.clone(),
        index: memory,
        search_provider: Arc::new(provider),
        scheduler: None,
    }
}
