//! Handlers for `/prescriptions` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/prescriptions` | Optional `?patient_id=<uuid>` |
//! | `POST` | `/prescriptions` | Body: `NewPrescription`; 201 |
//! | `GET`  | `/prescriptions/{id}` | 404 if not found |
//! | `POST` | `/prescriptions/{id}/payment-authorized` | |
//! | `POST` | `/prescriptions/{id}/signature` | Body: `SubscriptionTerms` |
//! | `POST` | `/prescriptions/{id}/cancel` | Body: `{"reason":…}` (optional field) |
//! | `POST` | `/prescriptions/{id}/replace` | Body: `NewPrescription`; 201 |
//! | `GET`  | `/prescriptions/{id}/dose` | Dose preview |
//! | `GET`  | `/prescriptions/{id}/fulfillments` | Ledger history |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use titra_core::{
  ledger::FulfillmentLedgerEntry,
  prescription::{NewPrescription, Prescription},
  progression::DosePreview,
  subscription::{Subscription, SubscriptionTerms},
};
use titra_engine::Backend;
use uuid::Uuid;

use crate::{Engine, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub patient_id: Option<Uuid>,
}

/// `GET /prescriptions[?patient_id=<uuid>]`
pub async fn list<B: Backend>(
  State(engine): State<Engine<B>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Prescription>>, ApiError> {
  Ok(Json(engine.list_prescriptions(params.patient_id).await?))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /prescriptions`
pub async fn create<B: Backend>(
  State(engine): State<Engine<B>>,
  Json(body): Json<NewPrescription>,
) -> Result<impl IntoResponse, ApiError> {
  let prescription = engine.create_prescription(body).await?;
  Ok((StatusCode::CREATED, Json(prescription)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /prescriptions/{id}`
pub async fn get_one<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Prescription>, ApiError> {
  Ok(Json(engine.get_prescription(id).await?))
}

// ─── Lifecycle signals ────────────────────────────────────────────────────────

/// `POST /prescriptions/{id}/payment-authorized`
pub async fn payment_authorized<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Prescription>, ApiError> {
  Ok(Json(engine.record_payment_authorized(id).await?))
}

#[derive(Debug, Serialize)]
pub struct Activation {
  pub prescription: Prescription,
  pub subscription: Subscription,
}

/// `POST /prescriptions/{id}/signature`
pub async fn signature<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
  Json(terms): Json<SubscriptionTerms>,
) -> Result<Json<Activation>, ApiError> {
  if terms.external_customer_ref.trim().is_empty() {
    return Err(ApiError::BadRequest("external_customer_ref must not be empty".into()));
  }
  let (prescription, subscription) = engine.record_signature(id, terms).await?;
  Ok(Json(Activation { prescription, subscription }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
  #[serde(default)]
  pub reason: Option<String>,
}

/// `POST /prescriptions/{id}/cancel`
pub async fn cancel<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CancelBody>,
) -> Result<Json<Prescription>, ApiError> {
  Ok(Json(engine.cancel_prescription(id, body.reason.as_deref()).await?))
}

/// `POST /prescriptions/{id}/replace`
pub async fn replace<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
  Json(body): Json<NewPrescription>,
) -> Result<impl IntoResponse, ApiError> {
  let replacement = engine.replace_prescription(id, body).await?;
  Ok((StatusCode::CREATED, Json(replacement)))
}

// ─── Read models ──────────────────────────────────────────────────────────────

/// `GET /prescriptions/{id}/dose`
pub async fn dose<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DosePreview>, ApiError> {
  Ok(Json(engine.dose_preview(id).await?))
}

/// `GET /prescriptions/{id}/fulfillments`
pub async fn fulfillments<B: Backend>(
  State(engine): State<Engine<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<FulfillmentLedgerEntry>>, ApiError> {
  Ok(Json(engine.fulfillment_history(id).await?))
}
