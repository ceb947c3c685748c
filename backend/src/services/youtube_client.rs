use crate::config::Config;
use crate::services::search_service::{RawSearchPage, SearchQuery, VideoSearchProvider};
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// The Data API accepts at most 50 ids per `videos`/`channels` call.
const ID_BATCH_SIZE: usize = 50;

/// YouTube Data API v3 client used as the search collaborator.
pub struct YouTubeClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    region_code: String,
    relevance_language: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl YouTubeClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut base = config.youtube_api_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid YOUTUBE_API_BASE '{}'", config.youtube_api_base))?;

        if config.youtube_api_key.is_none() {
            warn!("YOUTUBE_API_KEY is not set; admin search will be unavailable.");
        }

        Ok(Self {
            http: Client::builder().build()?,
            base_url,
            api_key: config.youtube_api_key.clone(),
            region_code: config.youtube_region_code.clone(),
            relevance_language: config.youtube_relevance_language.clone(),
            min_interval: config.youtube_min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Spaces outbound requests at least `min_interval` apart. Gives up instead
    /// of waiting past `deadline`, whether for the slot or for the spacing.
    async fn throttle(&self, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow::anyhow!("deadline exceeded before the request"));
        }
        let mut last = tokio::time::timeout(remaining, self.last_request.lock())
            .await
            .map_err(|_| anyhow::anyhow!("deadline exceeded waiting for a request slot"))?;

        if let Some(previous) = *last {
            let wait = self.min_interval.saturating_sub(previous.elapsed());
            if !wait.is_zero() {
                if wait >= deadline.saturating_duration_since(Instant::now()) {
                    return Err(anyhow::anyhow!(
                        "deadline exceeded before the next request slot"
                    ));
                }
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }

    async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        deadline: Instant,
    ) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("YOUTUBE_API_KEY is not configured"))?;

        self.throttle(deadline).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow::anyhow!("deadline exceeded before calling {endpoint}"));
        }

        let url = self.base_url.join(endpoint)?;
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&[("key", api_key)])
            .timeout(remaining)
            .send()
            .await
            .with_context(|| format!("YouTube {endpoint} request failed"))?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse YouTube {endpoint} response as JSON"))?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "YouTube {endpoint} returned {status}: {}",
                api_error_message(&body)
            ));
        }
        Ok(body)
    }

    async fn search_ids(&self, query: &SearchQuery, deadline: Instant) -> Result<Vec<String>> {
        let response = self
            .get_json("search", &search_params(query, &self.region_code, &self.relevance_language), deadline)
            .await?;
        Ok(parse_search_ids(&response))
    }

    async fn video_details(&self, video_ids: &[String], deadline: Instant) -> Result<Vec<Value>> {
        let mut videos = Vec::new();
        for batch in video_ids.chunks(ID_BATCH_SIZE) {
            let params = [
                ("part", "snippet,statistics,contentDetails".to_string()),
                ("id", batch.join(",")),
            ];
            let response = self.get_json("videos", &params, deadline).await?;
            if let Some(items) = response["items"].as_array() {
                videos.extend(items.iter().cloned());
            }
        }
        Ok(videos)
    }

    async fn channel_subscribers(
        &self,
        channel_ids: &[String],
        deadline: Instant,
    ) -> Result<HashMap<String, u64>> {
        let mut subscribers = HashMap::new();
        for batch in channel_ids.chunks(ID_BATCH_SIZE) {
            let params = [("part", "statistics".to_string()), ("id", batch.join(","))];
            let response = self.get_json("channels", &params, deadline).await?;
            subscribers.extend(parse_channel_subscribers(&response));
        }
        Ok(subscribers)
    }
}

#[rocket::async_trait]
impl VideoSearchProvider for YouTubeClient {
    async fn search(&self, query: &SearchQuery, timeout: Duration) -> Result<RawSearchPage> {
        let deadline = Instant::now() + timeout;

        let ranked_ids = self.search_ids(query, deadline).await?;
        if ranked_ids.is_empty() {
            info!("No videos found for \"{}\"", query.keywords);
            return Ok(RawSearchPage::default());
        }

        let videos = self.video_details(&ranked_ids, deadline).await?;

        let channel_ids: Vec<String> = videos
            .iter()
            .filter_map(|v| v["snippet"]["channelId"].as_str())
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Subscriber counts are optional; losing them must not fail the search.
        let channel_subscribers = match self.channel_subscribers(&channel_ids, deadline).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!("Failed to fetch channel subscriber counts: {e:#}");
                HashMap::new()
            }
        };

        Ok(RawSearchPage {
            ranked_ids,
            videos,
            channel_subscribers,
        })
    }
}

pub fn search_params(
    query: &SearchQuery,
    region_code: &str,
    relevance_language: &str,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("part", "id".to_string()),
        ("type", "video".to_string()),
        ("q", query.keywords.clone()),
        ("order", query.order.as_str().to_string()),
        ("maxResults", query.max_results.to_string()),
        ("regionCode", region_code.to_string()),
        ("relevanceLanguage", relevance_language.to_string()),
    ];
    if let Some(published_after) = query.published_after {
        params.push((
            "publishedAfter",
            published_after.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    params
}

pub fn parse_search_ids(response: &Value) -> Vec<String> {
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"]["videoId"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Channels with hidden subscriber counts are left out rather than reported as zero.
pub fn parse_channel_subscribers(response: &Value) -> HashMap<String, u64> {
    let mut subscribers = HashMap::new();
    if let Some(items) = response["items"].as_array() {
        for item in items {
            let statistics = &item["statistics"];
            if statistics["hiddenSubscriberCount"].as_bool().unwrap_or(false) {
                continue;
            }
            let count = statistics["subscriberCount"]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok());
            if let (Some(id), Some(count)) = (item["id"].as_str(), count) {
                subscribers.insert(id.to_string(), count);
            }
        }
    }
    subscribers
}

fn api_error_message(body: &Value) -> String {
    body["error"]["message"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::search_service::SearchOrder;
    use serde_json::json;

    #[test]
    fn search_params_forward_order_and_filters() {
        let query = SearchQuery {
            keywords: "machine learning explained".to_string(),
            max_results: 25,
            order: SearchOrder::ViewCount,
            published_after: "2024-01-01T00:00:00Z".parse().ok(),
        };

        let params: HashMap<_, _> = search_params(&query, "US", "en").into_iter().collect();
        assert_eq!(params["q"], "machine learning explained");
        assert_eq!(params["order"], "viewCount");
        assert_eq!(params["maxResults"], "25");
        assert_eq!(params["type"], "video");
        assert_eq!(params["publishedAfter"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn search_ids_skip_non_video_items() {
        let response = json!({
            "items": [
                { "id": { "kind": "youtube#video", "videoId": "dQw4w9WgXcQ" } },
                { "id": { "kind": "youtube#channel", "channelId": "UC1" } },
                { "id": { "kind": "youtube#video", "videoId": "jNQXAC9IVRw" } }
            ]
        });

        assert_eq!(
            parse_search_ids(&response),
            vec!["dQw4w9WgXcQ", "jNQXAC9IVRw"]
        );
        assert!(parse_search_ids(&json!({})).is_empty());
    }

    #[test]
    fn hidden_subscriber_counts_are_absent() {
        let response = json!({
            "items": [
                { "id": "UC1", "statistics": { "subscriberCount": "1200", "hiddenSubscriberCount": false } },
                { "id": "UC2", "statistics": { "hiddenSubscriberCount": true } },
                { "id": "UC3", "statistics": { "subscriberCount": "0" } }
            ]
        });

        let subscribers = parse_channel_subscribers(&response);
        assert_eq!(subscribers.get("UC1"), Some(&1200));
        assert_eq!(subscribers.get("UC2"), None);
        assert_eq!(subscribers.get("UC3"), Some(&0));
    }

    #[test]
    fn api_errors_surface_the_platform_message() {
        let body = json!({ "error": { "code": 403, "message": "quotaExceeded" } });
        assert_eq!(api_error_message(&body), "quotaExceeded");
    }

    #[rocket::async_test]
    async fn throttle_gives_up_instead_of_sleeping_past_the_deadline() {
        let config = Config {
            youtube_min_interval: Duration::from_secs(30),
            ..Config::default()
        };
        let client = YouTubeClient::new(&config).unwrap();
        *client.last_request.lock().await = Some(Instant::now());

        let started = Instant::now();
        let result = client
            .throttle(Instant::now() + Duration::from_millis(100))
            .await;

        assert!(result.unwrap_err().to_string().contains("deadline"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[rocket::async_test]
    async fn throttle_fails_when_the_deadline_already_passed() {
        let client = YouTubeClient::new(&Config::default()).unwrap();
        assert!(client.throttle(Instant::now()).await.is_err());
    }

    #[rocket::async_test]
    async fn first_request_is_not_delayed() {
        let client = YouTubeClient::new(&Config::default()).unwrap();
        client
            .throttle(Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        assert!(client.last_request.lock().await.is_some());
    }

    #[rocket::async_test]
    async fn search_without_api_key_fails_fast() {
        let client = YouTubeClient::new(&Config::default()).unwrap();
        let query = SearchQuery {
            keywords: "rust".to_string(),
            max_results: 5,
            order: SearchOrder::Relevance,
            published_after: None,
        };

        let error = client
            .search(&query, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("YOUTUBE_API_KEY"));
    }
}
