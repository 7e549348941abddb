//! [`RecurringFulfillmentProcessor`] converts billing events into
//! dispensations, at most once per event.
//!
//! A renewal runs in this order: ledger check, prescription lock, ledger
//! re-check, load, status check, stage resolution, subscription check,
//! catalog lookup, order creation, and finally one store transaction that
//! writes the ledger entry, moves the refill counter, and advances the charge
//! date. Nothing is committed unless the order collaborator confirmed, so a
//! failed attempt can be redelivered and will reprocess identically.
//!
//! The prescription must be active before anything is resolved; an event
//! that arrives while it still awaits payment or signature is refused as
//! retryable. An exhausted schedule completes the prescription whatever
//! state its subscription is in. Only an actual dispensation requires an
//! active subscription.
//!
//! Order requests carry the event id and the stage index. Within one
//! process the prescription lock keeps a redelivery on the same stage. Across
//! processes a retry after [`Error::ConcurrentModification`] may resolve a
//! later stage, and the order service sees that as a distinct request.

use std::{future::Future, marker::PhantomData, sync::Arc};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use titra_core::{
  Error, Result,
  collaborator::{
    CatalogResolver as _, CollaboratorError, FulfillmentClient as _, Notifier as _,
    OrderConfirmation, OrderRequest,
  },
  event::{BillingEvent, BillingEventType, CancellationReason, Notification},
  ledger::FulfillmentLedgerEntry,
  prescription::{Prescription, PrescriptionStatus},
  progression::{StageResolution, initial_stage, resolve_current_stage},
  schedule::DoseStage,
  store::{
    CommitOutcome, FulfillmentCommit, LifecycleChange, SubscriptionWrite, TreatmentStore as _,
  },
  subscription::{Subscription, SubscriptionStatus},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Backend, EngineConfig, locks::PrescriptionLocks};

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// What handling a billing event did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
  /// An order was created and recorded.
  Dispensed {
    entry:             FulfillmentLedgerEntry,
    refills_remaining: u32,
  },
  /// The event was recorded earlier; this is the original record.
  AlreadyProcessed { entry: FulfillmentLedgerEntry },
  /// The schedule is exhausted. The prescription is now completed and its
  /// subscription cancelled.
  NothingToDispense { prescription_id: Uuid },
  /// A cancellation event closed the subscription (and the prescription, if
  /// it was active).
  Cancelled {
    prescription_id:     Uuid,
    prescription_status: PrescriptionStatus,
  },
  /// A cancellation event arrived for something already closed.
  NoChange { prescription_id: Uuid },
}

// ─── Processor ───────────────────────────────────────────────────────────────

pub struct RecurringFulfillmentProcessor<B: Backend> {
  pub(crate) store:    Arc<B::Store>,
  pub(crate) catalog:  Arc<B::Catalog>,
  pub(crate) orders:   Arc<B::Orders>,
  pub(crate) notifier: Arc<B::Notifier>,
  pub(crate) locks:    PrescriptionLocks,
  pub(crate) config:   EngineConfig,
  _backend:            PhantomData<fn() -> B>,
}

impl<B: Backend> RecurringFulfillmentProcessor<B> {
  pub fn new(
    store: Arc<B::Store>,
    catalog: Arc<B::Catalog>,
    orders: Arc<B::Orders>,
    notifier: Arc<B::Notifier>,
    config: EngineConfig,
  ) -> Self {
    Self {
      store,
      catalog,
      orders,
      notifier,
      locks: PrescriptionLocks::new(),
      config,
      _backend: PhantomData,
    }
  }

  /// Dispatch a billing event by type.
  pub async fn handle_billing_event(&self, event: &BillingEvent) -> Result<FulfillmentOutcome> {
    let event_id = event.external_event_id.as_str();
    match event.event_type {
      BillingEventType::Initial => {
        self.process_renewal_event(event_id, event.prescription_id, true).await
      }
      BillingEventType::Renewal => {
        self.process_renewal_event(event_id, event.prescription_id, false).await
      }
      BillingEventType::Cancellation => {
        self.process_cancellation_event(event_id, event.prescription_id).await
      }
    }
  }

  /// Dispense the stage due for `prescription_id`, once per
  /// `external_event_id`.
  pub async fn process_renewal_event(
    &self,
    external_event_id: &str,
    prescription_id: Uuid,
    is_initial_order: bool,
  ) -> Result<FulfillmentOutcome> {
    if let Some(entry) = self.recorded(external_event_id, prescription_id).await? {
      debug!(event_id = external_event_id, %prescription_id, "event already processed");
      return Ok(FulfillmentOutcome::AlreadyProcessed { entry });
    }

    let _guard = self.locks.acquire(prescription_id).await;

    // A concurrent delivery may have committed while this one waited.
    if let Some(entry) = self.recorded(external_event_id, prescription_id).await? {
      debug!(event_id = external_event_id, %prescription_id, "event processed while waiting");
      return Ok(FulfillmentOutcome::AlreadyProcessed { entry });
    }

    let prescription = self.load_prescription(prescription_id).await?;
    self.ensure_dispensable(&prescription)?;

    let stage = if is_initial_order {
      initial_stage(&prescription.dose_schedule)
    } else {
      match resolve_current_stage(prescription.refills_remaining, prescription.max_stage()) {
        StageResolution::Due(index) => prescription.dose_schedule.stage(index),
        StageResolution::Exhausted | StageResolution::EmptySchedule => None,
        StageResolution::RefillsExceedSchedule => {
          error!(
            %prescription_id,
            refills_remaining = prescription.refills_remaining,
            max_stage = ?prescription.max_stage(),
            "refills exceed schedule depth; halting fulfillment pending review"
          );
          return Err(Error::ScheduleInvariantViolation {
            prescription_id,
            refills_remaining: prescription.refills_remaining,
            max_stage: prescription.max_stage(),
          });
        }
      }
    };

    let Some(stage) = stage.cloned() else {
      self
        .close_prescription(
          prescription,
          PrescriptionStatus::Completed,
          CancellationReason::ScheduleCompleted,
          None,
        )
        .await?;
      info!(event_id = external_event_id, %prescription_id, "titration schedule exhausted");
      return Ok(FulfillmentOutcome::NothingToDispense { prescription_id });
    };

    let subscription = self.active_subscription(prescription_id).await?;
    let order = self.place_order(external_event_id, &prescription, &stage).await?;

    // The initial fill does not consume a refill.
    let refills_after = if is_initial_order {
      prescription.refills_remaining
    } else {
      prescription.refills_remaining.saturating_sub(1)
    };
    let commit = FulfillmentCommit {
      entry: FulfillmentLedgerEntry {
        external_event_id:     external_event_id.to_owned(),
        prescription_id,
        stage_index_dispensed: stage.stage_index,
        order_ref:             order.order_ref,
        created_at:            Utc::now(),
      },
      expected_refills: prescription.refills_remaining,
      refills_after,
      subscription_id: subscription.id,
      next_charge_date: self.next_charge_date(&subscription),
    };

    match self.store.commit_fulfillment(&commit).await.map_err(Error::store)? {
      CommitOutcome::Committed(entry) => {
        info!(
          event_id = external_event_id,
          %prescription_id,
          stage_index = stage.stage_index,
          refills_remaining = refills_after,
          "dispensed"
        );
        if !is_initial_order && stage.stage_index > 0 {
          self.notifier.notify(Notification::DoseAdvanced {
            prescription_id,
            patient_id: prescription.patient_id,
            from_stage: stage.stage_index - 1,
            to_stage: stage.stage_index,
            dose_label: stage.dose_label.clone(),
          });
        }
        Ok(FulfillmentOutcome::Dispensed { entry, refills_remaining: refills_after })
      }
      CommitOutcome::Duplicate(entry) => {
        // Another process won the ledger insert; its record stands.
        self.ensure_same_prescription(&entry, prescription_id)?;
        info!(
          event_id = external_event_id,
          %prescription_id,
          "ledger conflict resolved as no-op"
        );
        Ok(FulfillmentOutcome::AlreadyProcessed { entry })
      }
      CommitOutcome::StaleRefills => {
        warn!(
          event_id = external_event_id,
          %prescription_id,
          "refill counter moved during renewal"
        );
        Err(Error::ConcurrentModification(prescription_id))
      }
    }
  }

  /// Close the subscription for a billing-side cancellation, and the
  /// prescription with it if it is active.
  pub async fn process_cancellation_event(
    &self,
    external_event_id: &str,
    prescription_id: Uuid,
  ) -> Result<FulfillmentOutcome> {
    let _guard = self.locks.acquire(prescription_id).await;

    let prescription = self.load_prescription(prescription_id).await?;

    if prescription.status == PrescriptionStatus::Active {
      let closed = self
        .close_prescription(
          prescription,
          PrescriptionStatus::Cancelled,
          CancellationReason::BillingCancelled,
          None,
        )
        .await?;
      info!(event_id = external_event_id, %prescription_id, "billing cancellation applied");
      return Ok(FulfillmentOutcome::Cancelled {
        prescription_id,
        prescription_status: closed.status,
      });
    }

    let live = self
      .store
      .subscription_for_prescription(prescription_id)
      .await
      .map_err(Error::store)?
      .filter(|s| !s.status.is_terminal());

    let Some(subscription) = live else {
      debug!(event_id = external_event_id, %prescription_id, "cancellation changes nothing");
      return Ok(FulfillmentOutcome::NoChange { prescription_id });
    };

    let expected = subscription.status;
    let mut cancelled = subscription;
    let notification = cancelled.cancel(CancellationReason::BillingCancelled);
    if !self
      .store
      .update_subscription(&cancelled, expected)
      .await
      .map_err(Error::store)?
    {
      return Err(Error::ConcurrentModification(prescription_id));
    }
    if let Some(n) = notification {
      self.notifier.notify(n);
    }
    info!(
      event_id = external_event_id,
      %prescription_id,
      "billing cancellation closed subscription"
    );
    Ok(FulfillmentOutcome::Cancelled {
      prescription_id,
      prescription_status: prescription.status,
    })
  }

  // ─── Shared helpers ─────────────────────────────────────────────────────────

  /// The ledger entry for `event_id`, if any. An entry recorded against a
  /// different prescription is an upstream bug.
  async fn recorded(
    &self,
    event_id: &str,
    prescription_id: Uuid,
  ) -> Result<Option<FulfillmentLedgerEntry>> {
    let entry = self.store.ledger_entry(event_id).await.map_err(Error::store)?;
    match entry {
      Some(entry) => {
        self.ensure_same_prescription(&entry, prescription_id)?;
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  fn ensure_same_prescription(
    &self,
    entry: &FulfillmentLedgerEntry,
    prescription_id: Uuid,
  ) -> Result<()> {
    if entry.prescription_id == prescription_id {
      return Ok(());
    }
    warn!(
      event_id = entry.external_event_id.as_str(),
      %prescription_id,
      recorded_for = %entry.prescription_id,
      "event id reused across prescriptions"
    );
    Err(Error::EventConflict {
      event_id:     entry.external_event_id.clone(),
      recorded_for: entry.prescription_id,
    })
  }

  pub(crate) async fn load_prescription(&self, id: Uuid) -> Result<Prescription> {
    self
      .store
      .get_prescription(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| {
        warn!(prescription_id = %id, "prescription not found");
        Error::PrescriptionNotFound(id)
      })
  }

  pub(crate) async fn load_subscription(&self, prescription_id: Uuid) -> Result<Subscription> {
    self
      .store
      .subscription_for_prescription(prescription_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SubscriptionNotFound(prescription_id))
  }

  /// Refuse prescriptions that cannot receive a dispensation now.
  fn ensure_dispensable(&self, prescription: &Prescription) -> Result<()> {
    let id = prescription.id;
    let status = prescription.status;
    if status.is_terminal() {
      warn!(prescription_id = %id, %status, "renewal for closed prescription");
      return Err(Error::TerminalPrescription { id, status });
    }
    if status != PrescriptionStatus::Active {
      info!(prescription_id = %id, %status, "billing event ahead of activation");
      return Err(Error::AwaitingActivation { id, status });
    }
    Ok(())
  }

  async fn active_subscription(&self, prescription_id: Uuid) -> Result<Subscription> {
    let subscription = self.load_subscription(prescription_id).await?;
    if subscription.status != SubscriptionStatus::Active {
      return Err(Error::NotDispensable {
        id:     prescription_id,
        reason: format!("subscription is {}", subscription.status),
      });
    }
    Ok(subscription)
  }

  fn next_charge_date(&self, subscription: &Subscription) -> NaiveDate {
    subscription
      .next_charge_date
      .checked_add_days(self.config.billing_cycle())
      .unwrap_or(subscription.next_charge_date)
  }

  async fn place_order(
    &self,
    external_event_id: &str,
    prescription: &Prescription,
    stage: &DoseStage,
  ) -> Result<OrderConfirmation> {
    let variant = self
      .bounded("catalog lookup", self.catalog.resolve_variant(stage))
      .await?
      .ok_or_else(|| {
        warn!(
          prescription_id = %prescription.id,
          stage_index = stage.stage_index,
          catalog_variant_id = stage.catalog_variant_id.as_str(),
          "catalog has no variant for stage"
        );
        Error::ExternalFulfillment(format!(
          "catalog has no variant for stage {} ({})",
          stage.stage_index, stage.catalog_variant_id
        ))
      })?;

    let request = OrderRequest {
      prescription_id:    prescription.id,
      external_event_id:  external_event_id.to_owned(),
      stage_index:        stage.stage_index,
      catalog_variant_id: variant.catalog_variant_id,
      price_id:           variant.price_id,
    };
    self
      .bounded("order creation", self.orders.create_order(&request))
      .await
  }

  /// Run a collaborator call under the configured timeout. Every failure is
  /// retryable.
  async fn bounded<T>(
    &self,
    what: &str,
    call: impl Future<Output = Result<T, CollaboratorError>>,
  ) -> Result<T> {
    let limit = self.config.collaborator_timeout();
    match tokio::time::timeout(limit, call).await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => {
        warn!(error = %e, "{what} failed");
        Err(Error::ExternalFulfillment(format!("{what}: {e}")))
      }
      Err(_) => {
        warn!(timeout = ?limit, "{what} timed out");
        Err(Error::ExternalFulfillment(format!("{what} timed out after {limit:?}")))
      }
    }
  }

  /// Move `prescription` to a terminal status, cancelling its live
  /// subscription in the same transaction, then notify.
  ///
  /// Callers hold the prescription lock.
  pub(crate) async fn close_prescription(
    &self,
    prescription: Prescription,
    to: PrescriptionStatus,
    reason: CancellationReason,
    successor: Option<Prescription>,
  ) -> Result<Prescription> {
    let expected_status = prescription.status;
    let mut closed = prescription;
    closed.transition(to, today())?;
    if let Some(successor) = &successor {
      closed.replaced_by = Some(successor.id);
    }

    let live = self
      .store
      .subscription_for_prescription(closed.id)
      .await
      .map_err(Error::store)?
      .filter(|s| !s.status.is_terminal());

    let mut notification = None;
    let subscription = live.map(|subscription| {
      let expected_status = subscription.status;
      let mut cancelled = subscription;
      notification = cancelled.cancel(reason);
      SubscriptionWrite::Update { subscription: cancelled, expected_status }
    });

    self
      .apply(&LifecycleChange {
        prescription: closed.clone(),
        expected_status,
        subscription,
        successor,
      })
      .await?;

    info!(prescription_id = %closed.id, from = %expected_status, to = %to, "prescription closed");
    if let Some(n) = notification {
      self.notifier.notify(n);
    }
    if to == PrescriptionStatus::Completed {
      self.notifier.notify(Notification::PrescriptionCompleted {
        prescription_id: closed.id,
        patient_id:      closed.patient_id,
      });
    }
    Ok(closed)
  }

  pub(crate) async fn apply(&self, change: &LifecycleChange) -> Result<()> {
    let applied = self
      .store
      .apply_lifecycle_change(change)
      .await
      .map_err(Error::store)?;
    if applied {
      Ok(())
    } else {
      warn!(prescription_id = %change.prescription.id, "lifecycle change lost a race");
      Err(Error::ConcurrentModification(change.prescription.id))
    }
  }
}

pub(crate) fn today() -> NaiveDate { Utc::now().date_naive() }
