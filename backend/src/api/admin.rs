use crate::error::{BulkAddFailure, IngestError};
use crate::models::{
    AdminToken, BulkAddRequest, BulkAddResponse, CheckDuplicatesRequest, CheckDuplicatesResponse,
    ReconcileReport, SearchRequest, SearchResponse,
};
use crate::services::{ingest_service, search_service};
use crate::AppState;
use log::info;
use rocket::serde::json::Json;
use rocket::{post, State};

#[post("/search", data = "<request>")]
pub async fn admin_search(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<SearchRequest>,
) -> Result<Json<SearchResponse>, IngestError> {
    let videos = search_service::search_videos(
        state.search_provider.as_ref(),
        &request,
        state.config.search_timeout,
    )
    .await?;

    Ok(Json(SearchResponse {
        count: videos.len(),
        videos,
    }))
}

#[post("/check-duplicates", data = "<request>")]
pub async fn check_duplicates(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<CheckDuplicatesRequest>,
) -> Result<Json<CheckDuplicatesResponse>, IngestError> {
    let response = ingest_service::check_duplicates(state.index.as_ref(), &request.video_ids).await?;
    Ok(Json(response))
}

#[post("/bulk-add", data = "<request>")]
pub async fn bulk_add(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<BulkAddRequest>,
) -> Result<Json<BulkAddResponse>, BulkAddFailure> {
    let category = state.registry.resolve(&request.category)?;
    let outcome = ingest_service::bulk_add(
        state.store.as_ref(),
        state.index.as_ref(),
        category,
        &request.videos,
    )
    .await?;

    Ok(Json(outcome))
}

#[post("/reconcile")]
pub async fn reconcile(
    _token: AdminToken,
    state: &State<AppState>,
) -> Result<Json<ReconcileReport>, IngestError> {
    info!("Manual reconciliation requested");
    let report = ingest_service::reconcile(
        state.store.as_ref(),
        state.index.as_ref(),
        &state.registry,
    )
    .await?;

    Ok(Json(report))
}
