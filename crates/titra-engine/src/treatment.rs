//! Provider-side treatment actions and read models.
//!
//! Every write takes the prescription lock and goes through a single
//! guarded store call, so a lost race surfaces as
//! [`Error::ConcurrentModification`] with nothing written.

use chrono::Utc;
use serde::Serialize;
use titra_core::{
  Error, Result,
  event::CancellationReason,
  ledger::FulfillmentLedgerEntry,
  prescription::{NewPrescription, Prescription, PrescriptionStatus},
  progression::DosePreview,
  store::{LifecycleChange, SubscriptionWrite, TreatmentStore as _},
  subscription::{Subscription, SubscriptionStatus, SubscriptionTerms},
};
use tracing::info;
use uuid::Uuid;

use crate::{Backend, RecurringFulfillmentProcessor, processor::today};

/// The two prescriptions touched by a replacement.
#[derive(Debug, Clone, Serialize)]
pub struct Replacement {
  pub replaced:  Prescription,
  pub successor: Prescription,
}

impl<B: Backend> RecurringFulfillmentProcessor<B> {
  // ─── Lifecycle ─────────────────────────────────────────────────────────────

  pub async fn create_prescription(&self, new: NewPrescription) -> Result<Prescription> {
    let prescription = new.into_prescription(Uuid::new_v4(), Utc::now())?;
    self
      .store
      .insert_prescription(&prescription)
      .await
      .map_err(Error::store)?;
    info!(
      prescription_id = %prescription.id,
      patient_id = %prescription.patient_id,
      stages = prescription.dose_schedule.len(),
      refills_remaining = prescription.refills_remaining,
      "prescription created"
    );
    Ok(prescription)
  }

  /// `pending_payment` → `pending_signature`.
  pub async fn record_payment_authorized(&self, id: Uuid) -> Result<Prescription> {
    let _guard = self.locks.acquire(id).await;
    let current = self.load_prescription(id).await?;
    let mut next = current.clone();
    next.transition(PrescriptionStatus::PendingSignature, today())?;
    self
      .apply(&LifecycleChange {
        prescription:    next.clone(),
        expected_status: current.status,
        subscription:    None,
        successor:       None,
      })
      .await?;
    info!(prescription_id = %id, "payment authorized");
    Ok(next)
  }

  /// `pending_signature` → `active`, opening the subscription in the same
  /// transaction.
  pub async fn record_signature(
    &self,
    id: Uuid,
    terms: SubscriptionTerms,
  ) -> Result<(Prescription, Subscription)> {
    let _guard = self.locks.acquire(id).await;
    let current = self.load_prescription(id).await?;
    let mut next = current.clone();
    next.transition(PrescriptionStatus::Active, today())?;
    let subscription = terms.into_subscription(Uuid::new_v4(), id, next.patient_id, Utc::now());
    self
      .apply(&LifecycleChange {
        prescription:    next.clone(),
        expected_status: current.status,
        subscription:    Some(SubscriptionWrite::Insert(subscription.clone())),
        successor:       None,
      })
      .await?;
    info!(
      prescription_id = %id,
      subscription_id = %subscription.id,
      next_charge_date = %subscription.next_charge_date,
      "prescription signed and activated"
    );
    Ok((next, subscription))
  }

  /// `active` → `cancelled`, cancelling the subscription with it.
  pub async fn cancel_prescription(&self, id: Uuid, reason: Option<&str>) -> Result<Prescription> {
    let _guard = self.locks.acquire(id).await;
    let current = self.load_prescription(id).await?;
    let closed = self
      .close_prescription(
        current,
        PrescriptionStatus::Cancelled,
        CancellationReason::PrescriptionCancelled,
        None,
      )
      .await?;
    info!(
      prescription_id = %id,
      reason = reason.unwrap_or("unspecified"),
      "prescription cancelled"
    );
    Ok(closed)
  }

  /// Supersede `old_id` with a new prescription. The old one becomes
  /// `replaced` and its subscription is cancelled; the successor starts at
  /// `pending_payment` and links back to it.
  pub async fn replace_prescription(
    &self,
    old_id: Uuid,
    new: NewPrescription,
  ) -> Result<Replacement> {
    let _guard = self.locks.acquire(old_id).await;
    let current = self.load_prescription(old_id).await?;
    current
      .status
      .validate_transition(PrescriptionStatus::Replaced)?;

    let mut successor = new.into_prescription(Uuid::new_v4(), Utc::now())?;
    successor.replaces = Some(old_id);

    let replaced = self
      .close_prescription(
        current,
        PrescriptionStatus::Replaced,
        CancellationReason::PrescriptionReplaced,
        Some(successor.clone()),
      )
      .await?;
    info!(prescription_id = %old_id, successor_id = %successor.id, "prescription replaced");
    Ok(Replacement { replaced, successor })
  }

  // ─── Subscription ──────────────────────────────────────────────────────────

  pub async fn pause_subscription(&self, prescription_id: Uuid) -> Result<Subscription> {
    self
      .move_subscription(prescription_id, SubscriptionStatus::Paused)
      .await
  }

  pub async fn resume_subscription(&self, prescription_id: Uuid) -> Result<Subscription> {
    self
      .move_subscription(prescription_id, SubscriptionStatus::Active)
      .await
  }

  async fn move_subscription(
    &self,
    prescription_id: Uuid,
    to: SubscriptionStatus,
  ) -> Result<Subscription> {
    let _guard = self.locks.acquire(prescription_id).await;
    let mut subscription = self.load_subscription(prescription_id).await?;
    let from = subscription.transition(to)?;
    let written = self
      .store
      .update_subscription(&subscription, from)
      .await
      .map_err(Error::store)?;
    if !written {
      return Err(Error::ConcurrentModification(prescription_id));
    }
    info!(
      %prescription_id,
      subscription_id = %subscription.id,
      %from,
      %to,
      "subscription status changed"
    );
    Ok(subscription)
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_prescription(&self, id: Uuid) -> Result<Prescription> {
    self.load_prescription(id).await
  }

  pub async fn list_prescriptions(&self, patient_id: Option<Uuid>) -> Result<Vec<Prescription>> {
    self
      .store
      .list_prescriptions(patient_id)
      .await
      .map_err(Error::store)
  }

  /// The prescription's current subscription, cancelled or not.
  pub async fn subscription(&self, prescription_id: Uuid) -> Result<Subscription> {
    self.load_subscription(prescription_id).await
  }

  pub async fn dose_preview(&self, prescription_id: Uuid) -> Result<DosePreview> {
    let prescription = self.load_prescription(prescription_id).await?;
    Ok(DosePreview::of(&prescription))
  }

  /// Every dispensation recorded for a prescription, oldest first.
  pub async fn fulfillment_history(
    &self,
    prescription_id: Uuid,
  ) -> Result<Vec<FulfillmentLedgerEntry>> {
    self.load_prescription(prescription_id).await?;
    self
      .store
      .ledger_for_prescription(prescription_id)
      .await
      .map_err(Error::store)
  }
}
