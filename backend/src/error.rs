use crate::models::{BulkAddResponse, ErrorResponse};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::Response;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("video {video_id} already exists in category {category}")]
    AlreadyExists { category: String, video_id: String },
    #[error("{0}")]
    NotFound(String),
    #[error("search provider unavailable: {0}")]
    SearchUnavailable(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("{0}")]
    Unauthorized(String),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation_error",
            IngestError::AlreadyExists { .. } => "already_exists",
            IngestError::NotFound(_) => "not_found",
            IngestError::SearchUnavailable(_) => "search_unavailable",
            IngestError::Storage(_) => "storage_error",
            IngestError::Unauthorized(_) => "unauthorized",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            IngestError::Validation(_) => Status::BadRequest,
            IngestError::AlreadyExists { .. } => Status::Conflict,
            IngestError::NotFound(_) => Status::NotFound,
            IngestError::SearchUnavailable(_) => Status::BadGateway,
            IngestError::Storage(_) => Status::InternalServerError,
            IngestError::Unauthorized(_) => Status::Unauthorized,
        }
    }

    /// Whether a caller may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::SearchUnavailable(_) | IngestError::Storage(_)
        )
    }
}

impl From<elasticsearch::Error> for IngestError {
    fn from(e: elasticsearch::Error) -> Self {
        IngestError::Storage(e.to_string())
    }
}

pub(crate) fn json_response<T: Serialize>(status: Status, body: &T) -> response::Result<'static> {
    let json = serde_json::to_string(body).map_err(|e| {
        log::error!("Failed to serialize response body: {e:?}");
        Status::InternalServerError
    })?;
    Response::build()
        .status(status)
        .header(ContentType::JSON)
        .sized_body(json.len(), Cursor::new(json))
        .ok()
}

impl<'r> Responder<'r, 'static> for IngestError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        json_response(self.status(), &body)
    }
}

/// A bulk-add that stopped early. `committed` lists exactly what was
/// durably stored before `error` occurred.
#[derive(Debug)]
pub struct BulkAddFailure {
    pub committed: BulkAddResponse,
    pub error: IngestError,
}

impl From<IngestError> for BulkAddFailure {
    fn from(error: IngestError) -> Self {
        BulkAddFailure {
            committed: BulkAddResponse::default(),
            error,
        }
    }
}

#[derive(Serialize)]
struct BulkAddFailureBody<'a> {
    error: &'static str,
    message: String,
    #[serde(flatten)]
    committed: &'a BulkAddResponse,
}

impl<'r> Responder<'r, 'static> for BulkAddFailure {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = BulkAddFailureBody {
            error: self.error.kind(),
            message: self.error.to_string(),
            committed: &self.committed,
        };
        json_response(self.error.status(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            IngestError::Validation("bad".into()).status(),
            Status::BadRequest
        );
        assert_eq!(IngestError::NotFound("x".into()).status(), Status::NotFound);
        assert_eq!(
            IngestError::SearchUnavailable("down".into()).status().class(),
            rocket::http::StatusClass::ServerError
        );
        assert_eq!(
            IngestError::Storage("io".into()).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn only_collaborator_and_storage_failures_are_retryable() {
        assert!(IngestError::Storage("io".into()).is_retryable());
        assert!(IngestError::SearchUnavailable("down".into()).is_retryable());
        assert!(!IngestError::Validation("bad".into()).is_retryable());
        assert!(!IngestError::NotFound("gone".into()).is_retryable());
    }
}
