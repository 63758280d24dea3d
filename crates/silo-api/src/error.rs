//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Domain errors map onto specific, actionable responses; infrastructure
//! failures collapse into a generic 500 that leaks no internal detail.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("internal error")]
  Internal,
}

impl From<silo_core::Error> for ApiError {
  fn from(e: silo_core::Error) -> Self {
    use silo_core::Error as E;
    match e {
      E::Validation(m) => Self::BadRequest(m),
      E::UnknownEventType(m) => Self::BadRequest(format!("unknown event type: {m}")),
      E::Serialization(m) => Self::BadRequest(m.to_string()),
      E::Unauthorized => Self::Unauthorized,
      E::Forbidden(m) => Self::Forbidden(m),
      E::NotFound(m) => Self::NotFound(m),
      E::DuplicateEvent(id) => Self::Conflict(format!("event {id} already appended")),
      E::AlreadyExists(m) => Self::Conflict(m),
      // Never surface storage detail to clients.
      E::Storage(_) => Self::Internal,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
