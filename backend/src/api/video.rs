use crate::error::IngestError;
use crate::models::{
    AdminToken, NextVideoResponse, StatusField, UpdateStatusRequest, UpdateStatusResponse,
};
use crate::AppState;
use log::info;
use rocket::serde::json::Json;
use rocket::{get, post, State};

/// Highest-viewed pending video for a worker; defaults to the comment queue.
#[get("/next?<category>&<field>")]
pub async fn next_video(
    state: &State<AppState>,
    category: &str,
    field: Option<StatusField>,
) -> Result<Json<NextVideoResponse>, IngestError> {
    let category = state.registry.resolve(category)?;
    let field = field.unwrap_or(StatusField::CommentedStatus);

    let video = state.store.next_pending(category, field).await?;
    Ok(Json(NextVideoResponse { video }))
}

#[post("/update-status", data = "<request>")]
pub async fn update_status(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, IngestError> {
    let category = state.registry.resolve(&request.category)?;
    state
        .store
        .update_status(category, &request.video_id, request.field, request.value)
        .await?;

    info!(
        "Set {} = {} for {} in {}",
        request.field.as_str(),
        request.value.as_str(),
        request.video_id,
        category.id
    );
    Ok(Json(UpdateStatusResponse {
        success: true,
        message: format!("{} updated", request.field.as_str()),
    }))
}
