use crate::error::IngestError;
use crate::models::{
    Category, CategoryStats, DedupEntry, NormalizedVideo, ProcessingStatus, StatusField,
    VideoRecord,
};
use crate::services::storage::{DedupIndex, VideoStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct CategoryTable {
    next_id: u64,
    rows: Vec<VideoRecord>,
    positions: HashMap<String, usize>,
}

impl CategoryTable {
    /// Rows ordered by views; `sort_by` is stable so ties keep insertion order.
    fn ranked_by_views(&self) -> Vec<&VideoRecord> {
        let mut ranked: Vec<&VideoRecord> = self.rows.iter().collect();
        ranked.sort_by(|a, b| b.view_count.cmp(&a.view_count));
        ranked
    }
}

/// In-process backend for both the category stores and the dedup ledger.
/// Every operation holds a single lock, so each one is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, CategoryTable>>,
    ledger: Mutex<HashMap<String, DedupEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, IngestError> {
    mutex
        .lock()
        .map_err(|_| IngestError::Storage("memory store lock poisoned".to_string()))
}

#[rocket::async_trait]
impl VideoStore for MemoryStore {
    async fn insert(
        &self,
        category: &Category,
        video: &NormalizedVideo,
    ) -> Result<VideoRecord, IngestError> {
        let mut tables = lock(&self.tables)?;
        let table = tables.entry(category.collection.clone()).or_default();

        if table.positions.contains_key(&video.video_id) {
            return Err(IngestError::AlreadyExists {
                category: category.id.clone(),
                video_id: video.video_id.clone(),
            });
        }

        table.next_id += 1;
        let record = VideoRecord::new(table.next_id, video, Utc::now());
        table
            .positions
            .insert(record.video_id.clone(), table.rows.len());
        table.rows.push(record.clone());
        Ok(record)
    }

    async fn list_top_by_views(
        &self,
        category: &Category,
        limit: usize,
    ) -> Result<Vec<VideoRecord>, IngestError> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .get(&category.collection)
            .map(|table| {
                table
                    .ranked_by_views()
                    .into_iter()
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stats(&self, category: &Category) -> Result<CategoryStats, IngestError> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .get(&category.collection)
            .map(|table| CategoryStats::from_records(&table.rows))
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        category: &Category,
        video_id: &str,
        field: StatusField,
        value: ProcessingStatus,
    ) -> Result<(), IngestError> {
        let mut tables = lock(&self.tables)?;
        let record = tables.get_mut(&category.collection).and_then(|table| {
            let position = *table.positions.get(video_id)?;
            table.rows.get_mut(position)
        });

        match record {
            Some(record) => {
                record.set_status(field, value);
                Ok(())
            }
            None => Err(IngestError::NotFound(format!(
                "Video {video_id} not found in category {}",
                category.id
            ))),
        }
    }

    async fn next_pending(
        &self,
        category: &Category,
        field: StatusField,
    ) -> Result<Option<VideoRecord>, IngestError> {
        let tables = lock(&self.tables)?;
        Ok(tables.get(&category.collection).and_then(|table| {
            table
                .ranked_by_views()
                .into_iter()
                .find(|record| record.status(field) == ProcessingStatus::Pending)
                .cloned()
        }))
    }

    async fn video_ids(&self, category: &Category) -> Result<Vec<String>, IngestError> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .get(&category.collection)
            .map(|table| table.rows.iter().map(|r| r.video_id.clone()).collect())
            .unwrap_or_default())
    }
}

#[rocket::async_trait]
impl DedupIndex for MemoryStore {
    async fn check_duplicates(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, DedupEntry>, IngestError> {
        let ledger = lock(&self.ledger)?;
        Ok(video_ids
            .iter()
            .filter_map(|id| ledger.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }

    async fn record_membership(&self, video_id: &str, category: &str) -> Result<(), IngestError> {
        let mut ledger = lock(&self.ledger)?;
        let now = Utc::now();

        match ledger.get_mut(video_id) {
            Some(entry) => {
                if entry.categories.insert(category.to_string()) {
                    entry.updated_at = now;
                }
            }
            None => {
                ledger.insert(
                    video_id.to_string(),
                    DedupEntry::first(video_id, category, now),
                );
            }
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<DedupEntry>, IngestError> {
        let ledger = lock(&self.ledger)?;
        Ok(ledger.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::category_registry::{CategoryRegistry, DEFAULT_CATEGORY_NAMES};
    use crate::test_support::video;

    fn categories() -> (Category, Category) {
        let registry = CategoryRegistry::from_names(&DEFAULT_CATEGORY_NAMES).unwrap();
        (registry.all()[0].clone(), registry.all()[1].clone())
    }

    #[rocket::async_test]
    async fn insert_enforces_uniqueness_per_category() {
        let store = MemoryStore::new();
        let (ai, marketing) = categories();

        let first = store.insert(&ai, &video("aaaaaaaaaaa", 10)).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.summary_status, ProcessingStatus::Pending);

        let again = store.insert(&ai, &video("aaaaaaaaaaa", 10)).await;
        assert!(matches!(again, Err(IngestError::AlreadyExists { .. })));

        // Same video in a different category is a separate row.
        store
            .insert(&marketing, &video("aaaaaaaaaaa", 10))
            .await
            .unwrap();
        assert_eq!(store.video_ids(&ai).await.unwrap().len(), 1);
        assert_eq!(store.video_ids(&marketing).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn top_by_views_breaks_ties_by_insertion_order() {
        let store = MemoryStore::new();
        let (ai, _) = categories();

        for (id, views) in [
            ("aaaaaaaaaaa", 50),
            ("bbbbbbbbbbb", 300),
            ("ccccccccccc", 50),
            ("ddddddddddd", 100),
        ] {
            store.insert(&ai, &video(id, views)).await.unwrap();
        }

        let top: Vec<String> = store
            .list_top_by_views(&ai, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.video_id)
            .collect();
        assert_eq!(top, vec!["bbbbbbbbbbb", "ddddddddddd", "aaaaaaaaaaa"]);
    }

    #[rocket::async_test]
    async fn update_status_on_missing_video_leaves_store_unchanged() {
        let store = MemoryStore::new();
        let (ai, _) = categories();
        store.insert(&ai, &video("aaaaaaaaaaa", 1)).await.unwrap();
        let before = store.list_top_by_views(&ai, 10).await.unwrap();

        let result = store
            .update_status(
                &ai,
                "zzzzzzzzzzz",
                StatusField::SummaryStatus,
                ProcessingStatus::Completed,
            )
            .await;

        assert!(matches!(result, Err(IngestError::NotFound(_))));
        assert_eq!(store.list_top_by_views(&ai, 10).await.unwrap(), before);
    }

    #[rocket::async_test]
    async fn next_pending_skips_completed_rows() {
        let store = MemoryStore::new();
        let (ai, _) = categories();
        store.insert(&ai, &video("aaaaaaaaaaa", 900)).await.unwrap();
        store.insert(&ai, &video("bbbbbbbbbbb", 100)).await.unwrap();
        store
            .update_status(
                &ai,
                "aaaaaaaaaaa",
                StatusField::CommentedStatus,
                ProcessingStatus::Completed,
            )
            .await
            .unwrap();

        let next = store
            .next_pending(&ai, StatusField::CommentedStatus)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.video_id, "bbbbbbbbbbb");

        let summary_next = store
            .next_pending(&ai, StatusField::SummaryStatus)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary_next.video_id, "aaaaaaaaaaa");
    }

    #[rocket::async_test]
    async fn record_membership_is_idempotent_and_keeps_first_category() {
        let store = MemoryStore::new();

        store.record_membership("aaaaaaaaaaa", "marketing").await.unwrap();
        let first = store.entries().await.unwrap().remove(0);

        store.record_membership("aaaaaaaaaaa", "marketing").await.unwrap();
        let unchanged = store.entries().await.unwrap().remove(0);
        assert_eq!(first, unchanged);

        store
            .record_membership("aaaaaaaaaaa", "ai_technology")
            .await
            .unwrap();
        let found = store
            .check_duplicates(&["aaaaaaaaaaa".to_string(), "bbbbbbbbbbb".to_string()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        let entry = &found["aaaaaaaaaaa"];
        assert_eq!(
            entry.categories.iter().collect::<Vec<_>>(),
            vec!["ai_technology", "marketing"]
        );
        assert_eq!(entry.first_added_to_category, "marketing");
        assert!(entry.updated_at >= entry.date_added);
    }
}
