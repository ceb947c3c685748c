use chrono::{DateTime, Utc};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminToken(pub String);

/// A fixed content bucket. `collection` names the physical store backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub collection: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Completed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Completed => "completed",
        }
    }
}

/// The two downstream pipelines that report back per video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
pub enum StatusField {
    #[serde(rename = "summary_status")]
    #[field(value = "summary_status")]
    SummaryStatus,
    #[serde(rename = "commented_status")]
    #[field(value = "commented_status")]
    CommentedStatus,
}

impl StatusField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusField::SummaryStatus => "summary_status",
            StatusField::CommentedStatus => "commented_status",
        }
    }
}

/// Search result reshaped into the internal schema. Optional snapshot
/// attributes stay absent when the platform did not supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVideo {
    pub video_id: String,
    pub title: String,
    pub channel_name: String,
    pub view_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_subscriber_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// One row of a category store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: u64,
    pub video_id: String,
    pub title: String,
    pub channel_name: String,
    pub view_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_subscriber_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub summary_status: ProcessingStatus,
    pub commented_status: ProcessingStatus,
    pub date_added: DateTime<Utc>,
}

impl VideoRecord {
    pub fn new(id: u64, video: &NormalizedVideo, date_added: DateTime<Utc>) -> Self {
        Self {
            id,
            video_id: video.video_id.clone(),
            title: video.title.clone(),
            channel_name: video.channel_name.clone(),
            view_count: video.view_count,
            channel_subscriber_count: video.channel_subscriber_count,
            duration: video.duration.clone(),
            summary_status: ProcessingStatus::Pending,
            commented_status: ProcessingStatus::Pending,
            date_added,
        }
    }

    pub fn status(&self, field: StatusField) -> ProcessingStatus {
        match field {
            StatusField::SummaryStatus => self.summary_status,
            StatusField::CommentedStatus => self.commented_status,
        }
    }

    pub fn set_status(&mut self, field: StatusField, value: ProcessingStatus) {
        match field {
            StatusField::SummaryStatus => self.summary_status = value,
            StatusField::CommentedStatus => self.commented_status = value,
        }
    }
}

/// Ledger row: every category an external video currently belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub video_id: String,
    pub categories: BTreeSet<String>,
    pub first_added_to_category: String,
    pub date_added: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DedupEntry {
    pub fn first(video_id: &str, category: &str, now: DateTime<Utc>) -> Self {
        Self {
            video_id: video_id.to_string(),
            categories: BTreeSet::from([category.to_string()]),
            first_added_to_category: category.to_string(),
            date_added: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub total: u64,
    pub pending_summary: u64,
    pub completed_summary: u64,
    pub pending_comments: u64,
    pub completed_comments: u64,
    pub avg_views: f64,
    pub max_views: u64,
}

impl CategoryStats {
    pub fn from_records(records: &[VideoRecord]) -> Self {
        let mut stats = CategoryStats::default();
        let mut view_sum: u128 = 0;

        for record in records {
            stats.total += 1;
            view_sum += u128::from(record.view_count);
            stats.max_views = stats.max_views.max(record.view_count);

            match record.summary_status {
                ProcessingStatus::Pending => stats.pending_summary += 1,
                ProcessingStatus::Completed => stats.completed_summary += 1,
            }
            match record.commented_status {
                ProcessingStatus::Pending => stats.pending_comments += 1,
                ProcessingStatus::Completed => stats.completed_comments += 1,
            }
        }

        if stats.total > 0 {
            stats.avg_views = view_sum as f64 / stats.total as f64;
        }
        stats
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryStatsResponse {
    pub category: String,
    pub stats: CategoryStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub keywords: String,
    pub max_results: Option<i64>,
    pub order: Option<String>,
    pub published_after: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub count: usize,
    pub videos: Vec<NormalizedVideo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckDuplicatesRequest {
    pub video_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateInfo {
    pub categories: Vec<String>,
    pub first_added_to_category: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckDuplicatesResponse {
    pub duplicates: BTreeMap<String, DuplicateInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkAddRequest {
    pub category: String,
    pub videos: Vec<NormalizedVideo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyInCategory,
    DuplicateInBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkAddResponse {
    pub added: Vec<String>,
    pub skipped: BTreeMap<String, SkipReason>,
    /// Added videos that were already members of other categories.
    #[serde(default)]
    pub already_in_categories: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub category: String,
    pub video_id: String,
    pub field: StatusField,
    pub value: ProcessingStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextVideoResponse {
    pub video: Option<VideoRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub video_id: String,
    pub category: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub repaired: Vec<Membership>,
    pub orphaned: Vec<Membership>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, views: u64, summary: ProcessingStatus) -> VideoRecord {
        let video = NormalizedVideo {
            video_id: format!("video{id:06}"),
            title: format!("Video {id}"),
            channel_name: "Channel".to_string(),
            view_count: views,
            channel_subscriber_count: None,
            duration: None,
        };
        let mut record = VideoRecord::new(id, &video, Utc::now());
        record.summary_status = summary;
        record
    }

    #[test]
    fn stats_aggregate_views_and_statuses() {
        let records = vec![
            record(1, 100, ProcessingStatus::Completed),
            record(2, 300, ProcessingStatus::Completed),
            record(3, 200, ProcessingStatus::Pending),
        ];

        let stats = CategoryStats::from_records(&records);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.avg_views, 200.0);
        assert_eq!(stats.max_views, 300);
        assert_eq!(stats.completed_summary, 2);
        assert_eq!(stats.pending_summary, 1);
        assert_eq!(stats.pending_comments, 3);
        assert_eq!(stats.completed_comments, 0);
    }

    #[test]
    fn stats_of_empty_category_are_zero() {
        assert_eq!(CategoryStats::from_records(&[]), CategoryStats::default());
    }

    #[test]
    fn absent_optional_fields_are_not_serialized() {
        let video = NormalizedVideo {
            video_id: "dQw4w9WgXcQ".to_string(),
            title: "t".to_string(),
            channel_name: "c".to_string(),
            view_count: 0,
            channel_subscriber_count: None,
            duration: Some("3:33".to_string()),
        };

        let json = serde_json::to_value(&video).unwrap();
        assert!(json.get("channel_subscriber_count").is_none());
        assert_eq!(json["duration"], "3:33");
        assert_eq!(json["view_count"], 0);
    }

    #[test]
    fn status_field_uses_column_names() {
        let field: StatusField = serde_json::from_str("\"commented_status\"").unwrap();
        assert_eq!(field, StatusField::CommentedStatus);
        assert_eq!(
            serde_json::to_string(&ProcessingStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
