//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Engine(#[from] titra_core::Error),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Engine(e) if e.is_not_found() => StatusCode::NOT_FOUND,
      ApiError::Engine(e) if e.is_invalid_state() => StatusCode::CONFLICT,
      // The billing source redelivers on 5xx; 503 marks the retryable ones.
      ApiError::Engine(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Engine(titra_core::Error::InvalidSchedule(_)) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::warn!(%status, error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use titra_core::Error;
  use uuid::Uuid;

  use super::*;

  #[test]
  fn engine_errors_map_to_statuses() {
    let cases = [
      (Error::PrescriptionNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
      (Error::SubscriptionNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
      (
        Error::NotDispensable { id: Uuid::nil(), reason: "paused".into() },
        StatusCode::CONFLICT,
      ),
      (Error::InvalidSchedule("empty".into()), StatusCode::UNPROCESSABLE_ENTITY),
      (Error::ExternalFulfillment("timeout".into()), StatusCode::SERVICE_UNAVAILABLE),
      (Error::ConcurrentModification(Uuid::nil()), StatusCode::SERVICE_UNAVAILABLE),
      (
        Error::AwaitingActivation {
          id:     Uuid::nil(),
          status: titra_core::prescription::PrescriptionStatus::PendingSignature,
        },
        StatusCode::SERVICE_UNAVAILABLE,
      ),
      (
        Error::ScheduleInvariantViolation {
          prescription_id:   Uuid::nil(),
          refills_remaining: 4,
          max_stage:         Some(2),
        },
        StatusCode::INTERNAL_SERVER_ERROR,
      ),
    ];
    for (error, status) in cases {
      assert_eq!(ApiError::from(error).status(), status);
    }
  }
}
