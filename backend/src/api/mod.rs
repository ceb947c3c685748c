pub mod admin;
pub mod categories;
pub mod video;

use crate::models::ErrorResponse;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{catch, Request};

/// Rejected requests (bad auth, unparseable bodies, unknown routes) still answer in JSON.
#[catch(default)]
pub fn json_catcher(status: Status, request: &Request<'_>) -> (Status, Json<ErrorResponse>) {
    let error = match status.code {
        400 | 422 => "validation_error",
        401 => "unauthorized",
        404 => "not_found",
        _ => "internal_error",
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: format!("{} {}: {}", request.method(), request.uri(), status.reason_lossy()),
        }),
    )
}
