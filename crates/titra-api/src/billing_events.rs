//! Handler for the billing-event webhook.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/billing-events` | Body: `external_event_id`, `prescription_id`, `event_type` |
//!
//! Redeliveries answer 200 with the originally recorded outcome. Retryable
//! failures answer 503 so the billing source tries again.

use axum::{Json, extract::State};
use titra_core::event::BillingEvent;
use titra_engine::{Backend, FulfillmentOutcome};
use tracing::debug;

use crate::{Engine, error::ApiError};

/// `POST /billing-events`
pub async fn receive<B: Backend>(
  State(engine): State<Engine<B>>,
  Json(event): Json<BillingEvent>,
) -> Result<Json<FulfillmentOutcome>, ApiError> {
  if event.external_event_id.trim().is_empty() {
    return Err(ApiError::BadRequest("external_event_id must not be empty".into()));
  }
  debug!(
    event_id = event.external_event_id.as_str(),
    prescription_id = %event.prescription_id,
    event_type = %event.event_type,
    "billing event received"
  );
  let outcome = engine.handle_billing_event(&event).await?;
  Ok(Json(outcome))
}
