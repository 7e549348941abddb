//! The `TreatmentStore` trait and the atomic write types it accepts.
//!
//! The trait is implemented by storage backends (e.g. `titra-store-sqlite`).
//! Every mutating method is a single transaction guarded by a
//! compare-and-set on the current status or refill count; a failed guard is
//! reported as a value, not an error, so callers can tell a lost race from a
//! broken database.

use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
  ledger::FulfillmentLedgerEntry,
  prescription::{Prescription, PrescriptionStatus},
  subscription::{Subscription, SubscriptionStatus},
};

// ─── Write types ─────────────────────────────────────────────────────────────

/// A subscription write bundled into a [`LifecycleChange`].
#[derive(Debug, Clone)]
pub enum SubscriptionWrite {
  Insert(Subscription),
  Update {
    subscription:    Subscription,
    expected_status: SubscriptionStatus,
  },
}

/// A prescription status change plus the records that must move with it.
#[derive(Debug, Clone)]
pub struct LifecycleChange {
  /// The new state of the prescription (status, end date, replacement link).
  pub prescription:    Prescription,
  /// The status the stored row must still have for the change to apply.
  pub expected_status: PrescriptionStatus,
  pub subscription:    Option<SubscriptionWrite>,
  /// A superseding prescription to insert in the same transaction.
  pub successor:       Option<Prescription>,
}

/// Everything committed after a confirmed order.
#[derive(Debug, Clone)]
pub struct FulfillmentCommit {
  pub entry:            FulfillmentLedgerEntry,
  /// The refill count read before the order was placed.
  pub expected_refills: u32,
  pub refills_after:    u32,
  pub subscription_id:  Uuid,
  pub next_charge_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
  Committed(FulfillmentLedgerEntry),
  /// Another writer already recorded this event; nothing was changed.
  Duplicate(FulfillmentLedgerEntry),
  /// The refill count moved since it was read; nothing was changed.
  StaleRefills,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Titra persistence backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait TreatmentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Prescriptions ─────────────────────────────────────────────────────

  fn insert_prescription(
    &self,
    prescription: &Prescription,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Retrieve a prescription by id. Returns `None` if not found.
  fn get_prescription(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Prescription>, Self::Error>> + Send;

  /// List prescriptions, optionally for one patient, oldest first.
  fn list_prescriptions(
    &self,
    patient_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Prescription>, Self::Error>> + Send;

  /// Apply `change` atomically. Returns `false`, writing nothing, if any
  /// status guard fails.
  fn apply_lifecycle_change(
    &self,
    change: &LifecycleChange,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  // ── Subscriptions ─────────────────────────────────────────────────────

  fn get_subscription(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subscription>, Self::Error>> + Send;

  /// The most recently created subscription for a prescription.
  fn subscription_for_prescription(
    &self,
    prescription_id: Uuid,
  ) -> impl Future<Output = Result<Option<Subscription>, Self::Error>> + Send;

  /// Write `subscription` if the stored status is still `expected_status`.
  fn update_subscription(
    &self,
    subscription: &Subscription,
    expected_status: SubscriptionStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

  // ── Fulfillment ledger ────────────────────────────────────────────────

  fn ledger_entry(
    &self,
    external_event_id: &str,
  ) -> impl Future<Output = Result<Option<FulfillmentLedgerEntry>, Self::Error>> + Send;

  /// Ledger entries for a prescription, oldest first.
  fn ledger_for_prescription(
    &self,
    prescription_id: Uuid,
  ) -> impl Future<Output = Result<Vec<FulfillmentLedgerEntry>, Self::Error>> + Send;

  /// Insert the ledger entry, move the refill counter, and advance the
  /// subscription's charge date in one transaction. The ledger's uniqueness
  /// constraint on `external_event_id` decides races.
  fn commit_fulfillment(
    &self,
    commit: &FulfillmentCommit,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send;
}
