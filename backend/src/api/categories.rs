use crate::error::IngestError;
use crate::models::{Category, CategoryStatsResponse, VideoRecord};
use crate::AppState;
use log::info;
use rocket::serde::json::Json;
use rocket::{get, State};

const DEFAULT_TOP_LIMIT: usize = 20;
const MAX_TOP_LIMIT: usize = 500;

#[get("/")]
pub async fn list_categories(state: &State<AppState>) -> Json<Vec<Category>> {
    Json(state.registry.all().to_vec())
}

#[get("/<id>")]
pub async fn get_category(state: &State<AppState>, id: &str) -> Result<Json<Category>, IngestError> {
    Ok(Json(state.registry.resolve(id)?.clone()))
}

#[get("/<id>/stats")]
pub async fn category_stats(
    state: &State<AppState>,
    id: &str,
) -> Result<Json<CategoryStatsResponse>, IngestError> {
    let category = state.registry.resolve(id)?;
    let stats = state.store.stats(category).await?;
    info!("Stats for {}: {} videos", category.id, stats.total);

    Ok(Json(CategoryStatsResponse {
        category: category.name.clone(),
        stats,
    }))
}

#[get("/<id>/videos?<limit>")]
pub async fn top_videos(
    state: &State<AppState>,
    id: &str,
    limit: Option<usize>,
) -> Result<Json<Vec<VideoRecord>>, IngestError> {
    let category = state.registry.resolve(id)?;
    let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT).min(MAX_TOP_LIMIT);

    let videos = state.store.list_top_by_views(category, limit).await?;
    Ok(Json(videos))
}
