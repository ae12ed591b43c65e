use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use herald_types::status::{
    DeleteError, DraftEditError, FinishError, FormError, GuardClass, RejectError,
};

/// Every way an operation can fail, as seen by a client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Finish(#[from] FinishError),
    #[error(transparent)]
    Reject(#[from] RejectError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
    #[error(transparent)]
    DraftEdit(#[from] DraftEditError),
    #[error("storage did not answer in time, retry later")]
    Unavailable,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable snake_case discriminant for clients to switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Form(e) => e.code(),
            Self::Finish(e) => e.code(),
            Self::Reject(e) => e.code(),
            Self::Delete(e) => e.code(),
            Self::DraftEdit(e) => e.code(),
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Form(e) => class_status(e.class()),
            Self::Finish(e) => class_status(e.class()),
            Self::Reject(e) => class_status(e.class()),
            Self::Delete(e) => class_status(e.class()),
            Self::DraftEdit(e) => class_status(e.class()),
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn class_status(class: GuardClass) -> StatusCode {
    match class {
        GuardClass::Forbidden => StatusCode::FORBIDDEN,
        GuardClass::BadRequest => StatusCode::BAD_REQUEST,
        GuardClass::Conflict => StatusCode::CONFLICT,
    }
}

/// Infrastructure failures are logged here and never shown to the client.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("internal error: {:#}", e);
        Self::Internal
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        Self::Validation(format!("bad path parameter: {}", e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Validation(format!("bad query string: {}", e.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Validation(format!("bad request body: {}", e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "fail",
            "code": self.code(),
            "description": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
