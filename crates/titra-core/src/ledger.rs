//! The fulfillment ledger: proof that a billing event was dispensed.
//!
//! Entries are write-once. The existence of an entry for an
//! `external_event_id` is the only evidence that an event was processed;
//! refill counts are never used to infer it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLedgerEntry {
  /// Unique across the whole ledger.
  pub external_event_id:     String,
  pub prescription_id:       Uuid,
  pub stage_index_dispensed: u32,
  /// Confirmation reference returned by the order collaborator.
  pub order_ref:             String,
  pub created_at:            DateTime<Utc>,
}
