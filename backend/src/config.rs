use crate::models::AdminToken;
use crate::services::category_registry::{CategoryRegistry, DEFAULT_CATEGORY_NAMES};
use crate::services::elasticsearch_service::EsStore;
use crate::services::ingest_service::reconcile;
use crate::services::memory_store::MemoryStore;
use crate::services::storage::{DedupIndex, VideoStore};
use crate::services::youtube_client::YouTubeClient;
use crate::AppState;
use anyhow::Result;
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    Elasticsearch,
};
use env_logger::{Builder, Env};
use log::{error, info};
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Elasticsearch,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(StorageBackend::Elasticsearch),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!(
                "STORAGE_BACKEND must be 'elasticsearch' or 'memory', got '{other}'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub elasticsearch_url: String,
    pub youtube_api_key: Option<String>,
    pub youtube_api_base: String,
    pub youtube_region_code: String,
    pub youtube_relevance_language: String,
    pub youtube_min_interval: Duration,
    pub search_timeout: Duration,
    pub admin_token: Option<String>,
    pub cors_origin: String,
    pub category_names: Vec<String>,
    pub reconcile_schedule: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Elasticsearch,
            elasticsearch_url: "http://localhost:9200".to_string(),
            youtube_api_key: None,
            youtube_api_base: "https://www.googleapis.com/youtube/v3/".to_string(),
            youtube_region_code: "US".to_string(),
            youtube_relevance_language: "en".to_string(),
            youtube_min_interval: Duration::from_millis(250),
            search_timeout: Duration::from_secs(15),
            admin_token: None,
            cors_origin: "*".to_string(),
            category_names: DEFAULT_CATEGORY_NAMES.iter().map(|s| s.to_string()).collect(),
            reconcile_schedule: None,
        }
    }
}

/// Unset and empty variables are treated the same.
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for {key} ('{v}'): {e}"))
        })
        .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let category_names = match env_opt("CATEGORIES") {
            Some(raw) => raw
                .split(';')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.category_names,
        };

        Ok(Self {
            storage_backend: env_parse("STORAGE_BACKEND")?.unwrap_or(defaults.storage_backend),
            elasticsearch_url: env_opt("ELASTICSEARCH_URL").unwrap_or(defaults.elasticsearch_url),
            youtube_api_key: env_opt("YOUTUBE_API_KEY"),
            youtube_api_base: env_opt("YOUTUBE_API_BASE").unwrap_or(defaults.youtube_api_base),
            youtube_region_code: env_opt("YOUTUBE_REGION_CODE")
                .unwrap_or(defaults.youtube_region_code),
            youtube_relevance_language: env_opt("YOUTUBE_RELEVANCE_LANGUAGE")
                .unwrap_or(defaults.youtube_relevance_language),
            youtube_min_interval: env_parse::<u64>("YOUTUBE_MIN_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.youtube_min_interval),
            search_timeout: env_parse::<u64>("SEARCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.search_timeout),
            admin_token: env_opt("ADMIN_TOKEN"),
            cors_origin: env_opt("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            category_names,
            reconcile_schedule: env_opt("RECONCILE_SCHEDULE"),
        })
    }
}

pub fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting video ingest backend...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

pub fn create_elasticsearch_client(es_url: &str) -> Result<Elasticsearch> {
    info!("Connecting to Elasticsearch at: {es_url}");

    let transport =
        TransportBuilder::new(SingleNodeConnectionPool::new(es_url.parse()?)).build()?;

    Ok(Elasticsearch::new(transport))
}

pub async fn setup_reconcile_scheduler(
    schedule: &str,
    store: Arc<dyn VideoStore>,
    index: Arc<dyn DedupIndex>,
    registry: CategoryRegistry,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let reconcile_job = Job::new_async(schedule, move |_uuid, _l| {
        let store = store.clone();
        let index = index.clone();
        let registry = registry.clone();
        Box::pin(async move {
            match reconcile(store.as_ref(), index.as_ref(), &registry).await {
                Ok(report) => info!(
                    "Scheduled reconciliation: {} repaired, {} orphaned",
                    report.repaired.len(),
                    report.orphaned.len()
                ),
                Err(e) => error!("Scheduled reconciliation failed: {e}"),
            }
        })
    })?;

    scheduler.add(reconcile_job).await?;
    scheduler.start().await?;
    info!("Reconciliation scheduler started ({schedule}).");

    Ok(scheduler)
}

pub async fn create_app_state(config: Config) -> Result<AppState> {
    let registry = CategoryRegistry::from_names(&config.category_names)?;

    let (store, index): (Arc<dyn VideoStore>, Arc<dyn DedupIndex>) = match config.storage_backend
    {
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart.");
            let memory = Arc::new(MemoryStore::new());
            (memory.clone() as Arc<dyn VideoStore>, memory as Arc<dyn DedupIndex>)
        }
        StorageBackend::Elasticsearch => {
            let es_store = Arc::new(EsStore::new(create_elasticsearch_client(
                &config.elasticsearch_url,
            )?));
            es_store.ensure_indices(&registry).await?;
            (
                es_store.clone() as Arc<dyn VideoStore>,
                es_store as Arc<dyn DedupIndex>,
            )
        }
    };

    let search_provider = Arc::new(YouTubeClient::new(&config)?);

    let scheduler = match config.reconcile_schedule.as_deref() {
        Some(schedule) => Some(Mutex::new(
            setup_reconcile_scheduler(schedule, store.clone(), index.clone(), registry.clone())
                .await?,
        )),
        None => None,
    };

    Ok(AppState {
        config,
        registry,
        store,
        index,
        search_provider,
        scheduler,
    })
}

pub fn create_cors(origin: &str) -> Result<rocket_cors::Cors> {
    let wildcard = origin == "*";
    let allowed_origins = if wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&[origin])
    };

    let cors = CorsOptions::default()
        .allowed_origins(allowed_origins)
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allowed_headers(AllowedHeaders::some(&[
            "Authorization",
            "Accept",
            "Content-Type",
        ]))
        // Browsers reject credentials on a wildcard origin.
        .allow_credentials(!wildcard)
        .to_cors()
        .map_err(|e| anyhow::anyhow!("Failed to create CORS options: {}", e))?;

    Ok(cors)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(state) = request.rocket().state::<AppState>() else {
            return Outcome::Error((Status::InternalServerError, "Application state missing"));
        };

        // No configured token means the admin surface is open.
        let Some(expected) = state.config.admin_token.as_deref() else {
            return Outcome::Success(AdminToken(String::new()));
        };

        let token = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "));

        match token {
            Some(t) => {
                if t == expected {
                    Outcome::Success(AdminToken(t.to_string()))
                } else {
                    Outcome::Error((Status::Unauthorized, "Invalid token"))
                }
            }
            None => Outcome::Error((Status::Unauthorized, "Missing token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_backend() {
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert_eq!(
            "Elasticsearch".parse::<StorageBackend>().unwrap(),
            StorageBackend::Elasticsearch
        );
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.category_names.len(), 3);
        assert!(config.admin_token.is_none());
        assert!(CategoryRegistry::from_names(&config.category_names).is_ok());
    }

    #[test]
    fn cors_accepts_wildcard_and_exact_origins() {
        assert!(create_cors("*").is_ok());
        assert!(create_cors("http://localhost:8080").is_ok());
    }

    #[rocket::async_test]
    async fn memory_backend_builds_without_external_services() {
        let config = Config {
            storage_backend: StorageBackend::Memory,
            ..Config::default()
        };

        let state = create_app_state(config).await.unwrap();
        assert_eq!(state.registry.all().len(), 3);
        assert!(state.scheduler.is_none());
    }
}
