//! Storage seams shared by the in-memory and Elasticsearch backends.
//!
//! A category store enforces per-category `video_id` uniqueness itself; that
//! constraint is the concurrency gate for racing ingests. The dedup index must
//! apply `record_membership` atomically per `video_id`.

use crate::error::IngestError;
use crate::models::{
    Category, CategoryStats, DedupEntry, NormalizedVideo, ProcessingStatus, StatusField,
    VideoRecord,
};
use std::collections::HashMap;

#[rocket::async_trait]
pub trait VideoStore: Send + Sync {
    /// Durably stores a new row, assigning its surrogate id and `date_added`.
    /// Fails with `AlreadyExists` when the category already holds `video.video_id`.
    async fn insert(
        &self,
        category: &Category,
        video: &NormalizedVideo,
    ) -> Result<VideoRecord, IngestError>;

    /// Descending by `view_count`, ties in insertion order.
    async fn list_top_by_views(
        &self,
        category: &Category,
        limit: usize,
    ) -> Result<Vec<VideoRecord>, IngestError>;

    async fn stats(&self, category: &Category) -> Result<CategoryStats, IngestError>;

    async fn update_status(
        &self,
        category: &Category,
        video_id: &str,
        field: StatusField,
        value: ProcessingStatus,
    ) -> Result<(), IngestError>;

    /// Highest-viewed row still pending for `field`.
    async fn next_pending(
        &self,
        category: &Category,
        field: StatusField,
    ) -> Result<Option<VideoRecord>, IngestError>;

    async fn video_ids(&self, category: &Category) -> Result<Vec<String>, IngestError>;
}

#[rocket::async_trait]
pub trait DedupIndex: Send + Sync {
    /// Ids absent from the ledger are omitted from the result.
    async fn check_duplicates(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, DedupEntry>, IngestError>;

    async fn record_membership(&self, video_id: &str, category: &str) -> Result<(), IngestError>;

    async fn entries(&self) -> Result<Vec<DedupEntry>, IngestError>;
}
