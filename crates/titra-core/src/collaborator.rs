//! Contracts for the external services the engine calls out to.
//!
//! Implementations live outside this crate (HTTP adapters in
//! `titra-server`, fakes in tests). The engine bounds every call with a
//! timeout, so implementations need not enforce one themselves.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{event::Notification, schedule::DoseStage};

/// Failure talking to a collaborator. Always retryable from the engine's
/// point of view.
#[derive(Debug, Error)]
pub enum CollaboratorError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("rejected: {0}")]
  Rejected(String),
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// The product and price identifiers to order for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVariant {
  pub catalog_variant_id: String,
  pub price_id:           String,
}

pub trait CatalogResolver: Send + Sync {
  /// Resolve the orderable variant for `stage`. `Ok(None)` means the catalog
  /// has no such variant.
  fn resolve_variant(
    &self,
    stage: &DoseStage,
  ) -> impl Future<Output = Result<Option<CatalogVariant>, CollaboratorError>> + Send;
}

// ─── Orders ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
  pub prescription_id:    Uuid,
  /// Forwarded so the collaborator can deduplicate on its side too.
  pub external_event_id:  String,
  pub stage_index:        u32,
  pub catalog_variant_id: String,
  pub price_id:           String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
  pub order_ref: String,
}

pub trait FulfillmentClient: Send + Sync {
  /// Create the order or invoice for one dispensation.
  fn create_order(
    &self,
    request: &OrderRequest,
  ) -> impl Future<Output = Result<OrderConfirmation, CollaboratorError>> + Send;
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Fire-and-forget sink for lifecycle notifications.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}
