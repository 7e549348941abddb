//! Handlers for a prescription's subscription.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/prescriptions/{id}/subscription` | Latest subscription, any status |
//! | `POST` | `/prescriptions/{id}/subscription/pause` | `active` → `paused` |
//! | `POST` | `/prescriptions/{id}/subscription/resume` | `paused` → `active` |

use axum::{
  Json,
  extract::{Path, State},
};
use titra_core::subscription::Subscription;
use titra_engine::Backend;
use uuid::Uuid;

use crate::{Engine, error::ApiError};

/// `GET /prescriptions/{id}/subscription`
pub async fn get_one<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
  Ok(Json(engine.subscription(id).await?))
}

/// `POST /prescriptions/{id}/subscription/pause`
pub async fn pause<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
  Ok(Json(engine.pause_subscription(id).await?))
}

/// `POST /prescriptions/{id}/subscription/resume`
pub async fn resume<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
  Ok(Json(engine.resume_subscription(id).await?))
}
