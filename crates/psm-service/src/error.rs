//! Service error type and [`axum::response::IntoResponse`] implementation.

use std::time::Duration;

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("invalid request: {0}")]
  BadRequest(String),

  #[error("{action} timed out after {}s", after.as_secs_f32())]
  Timeout { action: &'static str, after: Duration },

  #[error("service is closed")]
  Closed,

  /// An `ok: false` reply, carrying the worker's error message.
  #[error("{0}")]
  Failed(String),

  #[error("{0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Sync(#[from] psm_sync::Error),

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),
}

impl ServiceError {
  pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    let status = match &self {
      ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
      ServiceError::Closed => StatusCode::SERVICE_UNAVAILABLE,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
