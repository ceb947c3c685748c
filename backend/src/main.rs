#[macro_use]
extern crate rocket;

mod api;
mod config;
mod error;
mod models;
mod services;
mod utils;

#[cfg(test)]
mod test_support;

use crate::config::{create_app_state, create_cors, init_logger, load_environment, Config};
use crate::services::category_registry::CategoryRegistry;
use crate::services::search_service::VideoSearchProvider;
use crate::services::storage::{DedupIndex, VideoStore};
use log::{error, info};
use rocket::{Build, Rocket};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

pub struct AppState {
    pub config: Config,
    pub registry: CategoryRegistry,
    pub store: Arc<dyn VideoStore>,
    pub index: Arc<dyn DedupIndex>,
    pub search_provider: Arc<dyn VideoSearchProvider>,
    pub scheduler: Option<Mutex<JobScheduler>>,
}

pub fn build_rocket(state: AppState) -> anyhow::Result<Rocket<Build>> {
    let cors = create_cors(&state.config.cors_origin)?;

    Ok(rocket::build()
        .manage(state)
        .mount(
            "/api/categories",
            routes![
                api::categories::list_categories,
                api::categories::get_category,
                api::categories::category_stats,
                api::categories::top_videos,
            ],
        )
        .mount(
            "/api/admin",
            routes![
                api::admin::admin_search,
                api::admin::check_duplicates,
                api::admin::bulk_add,
                api::admin::reconcile,
            ],
        )
        .mount(
            "/api/videos",
            routes![api::video::next_video, api::video::update_status],
        )
        .register("/", catchers![api::json_catcher])
        .attach(cors))
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    load_environment();
    init_logger();

    let config = Config::from_env()?;
    info!(
        "Storage backend: {:?}, categories: {}",
        config.storage_backend,
        config.category_names.join(", ")
    );

    let state = create_app_state(config).await?;
    let rocket = build_rocket(state)?.launch().await?;

    if let Some(scheduler) = rocket
        .state::<AppState>()
        .and_then(|state| state.scheduler.as_ref())
    {
        if let Err(e) = scheduler.lock().await.shutdown().await {
            error!("Failed to stop reconciliation scheduler: {e}");
        }
    }

    Ok(())
}
