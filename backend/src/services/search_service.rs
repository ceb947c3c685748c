use crate::error::IngestError;
use crate::models::{NormalizedVideo, SearchRequest};
use crate::utils::normalize_duration;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const MAX_RESULTS_LIMIT: i64 = 50;
const DEFAULT_MAX_RESULTS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOrder {
    #[default]
    Relevance,
    ViewCount,
    Date,
    Rating,
}

impl SearchOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOrder::Relevance => "relevance",
            SearchOrder::ViewCount => "viewCount",
            SearchOrder::Date => "date",
            SearchOrder::Rating => "rating",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "relevance" => Some(SearchOrder::Relevance),
            "viewCount" => Some(SearchOrder::ViewCount),
            "date" => Some(SearchOrder::Date),
            "rating" => Some(SearchOrder::Rating),
            _ => None,
        }
    }
}

/// A validated search, ready to hand to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub keywords: String,
    pub max_results: u32,
    pub order: SearchOrder,
    pub published_after: Option<DateTime<Utc>>,
}

/// Raw platform metadata as returned by the collaborator.
#[derive(Debug, Clone, Default)]
pub struct RawSearchPage {
    /// Video ids in the platform's ranking order.
    pub ranked_ids: Vec<String>,
    /// `videos` resources (snippet, statistics, contentDetails), in any order.
    pub videos: Vec<Value>,
    /// Channel id to subscriber count, for channels that expose it.
    pub channel_subscribers: HashMap<String, u64>,
}

#[rocket::async_trait]
pub trait VideoSearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery, timeout: Duration) -> anyhow::Result<RawSearchPage>;
}

pub fn validate_search_request(request: &SearchRequest) -> Result<SearchQuery, IngestError> {
    let keywords = request.keywords.trim();
    if keywords.is_empty() {
        return Err(IngestError::Validation("Keywords are required".to_string()));
    }

    let max_results = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
    if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
        return Err(IngestError::Validation(format!(
            "maxResults must be between 1 and {MAX_RESULTS_LIMIT}, got {max_results}"
        )));
    }

    let order = match request.order.as_deref() {
        None => SearchOrder::default(),
        Some(value) => SearchOrder::parse(value).ok_or_else(|| {
            IngestError::Validation(format!(
                "order must be one of relevance, viewCount, date, rating; got '{value}'"
            ))
        })?,
    };

    let published_after = match request.published_after.as_deref() {
        None | Some("") => None,
        Some(value) => Some(value.parse::<DateTime<Utc>>().map_err(|e| {
            IngestError::Validation(format!("publishedAfter is not an RFC 3339 timestamp: {e}"))
        })?),
    };

    Ok(SearchQuery {
        keywords: keywords.to_string(),
        max_results: max_results as u32,
        order,
        published_after,
    })
}

fn parse_count(value: &Value) -> Option<u64> {
    // The Data API sends counts as decimal strings.
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Reshape one `videos` resource. Returns `None` when the resource has no id.
pub fn normalize_video(
    item: &Value,
    channel_subscribers: &HashMap<String, u64>,
) -> Option<NormalizedVideo> {
    let video_id = item["id"].as_str()?.to_string();
    let snippet = &item["snippet"];

    let channel_subscriber_count = snippet["channelId"]
        .as_str()
        .and_then(|channel_id| channel_subscribers.get(channel_id).copied());

    Some(NormalizedVideo {
        title: snippet["title"].as_str().unwrap_or("").to_string(),
        channel_name: snippet["channelTitle"].as_str().unwrap_or("").to_string(),
        view_count: parse_count(&item["statistics"]["viewCount"]).unwrap_or(0),
        channel_subscriber_count,
        duration: item["contentDetails"]["duration"]
            .as_str()
            .and_then(normalize_duration),
        video_id,
    })
}

/// Normalize a page, keeping the platform's ranking. `viewCount` is re-sorted
/// on our snapshot so the result is guaranteed non-increasing.
pub fn normalize_page(page: &RawSearchPage, order: SearchOrder) -> Vec<NormalizedVideo> {
    let mut by_id: HashMap<String, NormalizedVideo> = page
        .videos
        .iter()
        .filter_map(|item| normalize_video(item, &page.channel_subscribers))
        .map(|video| (video.video_id.clone(), video))
        .collect();

    let mut videos: Vec<NormalizedVideo> = page
        .ranked_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect();

    if !by_id.is_empty() {
        debug!(
            "{} video resources were not part of the ranked ids and were dropped",
            by_id.len()
        );
    }

    if order == SearchOrder::ViewCount {
        videos.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    }
    videos
}

/// Caller deadlines can only shorten the configured upper bound.
pub fn effective_timeout(requested_ms: Option<u64>, max_timeout: Duration) -> Duration {
    match requested_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms).min(max_timeout),
        _ => max_timeout,
    }
}

pub async fn search_videos(
    provider: &dyn VideoSearchProvider,
    request: &SearchRequest,
    max_timeout: Duration,
) -> Result<Vec<NormalizedVideo>, IngestError> {
    let query = validate_search_request(request)?;
    let timeout = effective_timeout(request.timeout_ms, max_timeout);

    info!(
        "Admin search: \"{}\" (max: {}, order: {})",
        query.keywords,
        query.max_results,
        query.order.as_str()
    );

    let page = match tokio::time::timeout(timeout, provider.search(&query, timeout)).await {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => {
            warn!("Search provider failed for \"{}\": {e:#}", query.keywords);
            return Err(IngestError::SearchUnavailable(format!("{e:#}")));
        }
        Err(_) => {
            warn!("Search provider timed out for \"{}\"", query.keywords);
            return Err(IngestError::SearchUnavailable(format!(
                "search timed out after {}ms",
                timeout.as_millis()
            )));
        }
    };

    let videos = normalize_page(&page, query.order);
    info!("Search for \"{}\" returned {} videos", query.keywords, videos.len());
    Ok(videos)
}
