//! Error types for `titra-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::prescription::PrescriptionStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("prescription not found: {0}")]
  PrescriptionNotFound(Uuid),

  #[error("no subscription found for prescription {0}")]
  SubscriptionNotFound(Uuid),

  #[error("invalid {entity} transition: {from} -> {to}")]
  InvalidTransition {
    entity: &'static str,
    from:   &'static str,
    to:     &'static str,
  },

  #[error("prescription {id} is {status} and cannot be dispensed")]
  TerminalPrescription { id: Uuid, status: PrescriptionStatus },

  #[error("prescription {id} is not dispensable: {reason}")]
  NotDispensable { id: Uuid, reason: String },

  /// Billing ran ahead of activation. Redelivery succeeds once the
  /// prescription is signed and paid.
  #[error("prescription {id} is {status}; dispensing waits for activation")]
  AwaitingActivation { id: Uuid, status: PrescriptionStatus },

  #[error("event {event_id:?} is already recorded against prescription {recorded_for}")]
  EventConflict { event_id: String, recorded_for: Uuid },

  /// Refills exceed the schedule depth. Treated as data corruption.
  #[error(
    "prescription {prescription_id}: {refills_remaining} refills exceed schedule depth \
     (max stage {max_stage:?})"
  )]
  ScheduleInvariantViolation {
    prescription_id:   Uuid,
    refills_remaining: u32,
    max_stage:         Option<u32>,
  },

  #[error("invalid dose schedule: {0}")]
  InvalidSchedule(String),

  #[error("external fulfillment failed: {0}")]
  ExternalFulfillment(String),

  #[error("prescription {0} was modified concurrently")]
  ConcurrentModification(Uuid),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether redelivering the triggering event may succeed. Nothing is
  /// committed when one of these is returned.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::ExternalFulfillment(_)
        | Self::ConcurrentModification(_)
        | Self::AwaitingActivation { .. }
    )
  }

  /// `NotFoundError` in the fulfillment taxonomy.
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::PrescriptionNotFound(_) | Self::SubscriptionNotFound(_))
  }

  /// `InvalidStateError` in the fulfillment taxonomy.
  pub fn is_invalid_state(&self) -> bool {
    matches!(
      self,
      Self::InvalidTransition { .. }
        | Self::TerminalPrescription { .. }
        | Self::NotDispensable { .. }
        | Self::EventConflict { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_external_cas_and_activation_failures_are_retryable() {
    assert!(Error::ExternalFulfillment("timeout".into()).is_retryable());
    let waiting = Error::AwaitingActivation {
      id:     Uuid::nil(),
      status: PrescriptionStatus::PendingSignature,
    };
    assert!(waiting.is_retryable());
    assert!(!waiting.is_invalid_state());
    assert!(Error::ConcurrentModification(Uuid::nil()).is_retryable());
    assert!(!Error::PrescriptionNotFound(Uuid::nil()).is_retryable());
    assert!(!Error::InvalidSchedule("empty".into()).is_retryable());
    assert!(
      !Error::ScheduleInvariantViolation {
        prescription_id:   Uuid::nil(),
        refills_remaining: 5,
        max_stage:         Some(2),
      }
      .is_retryable()
    );
  }

  #[test]
  fn terminal_prescription_is_invalid_state() {
    let e = Error::TerminalPrescription {
      id:     Uuid::nil(),
      status: PrescriptionStatus::Completed,
    };
    assert!(e.is_invalid_state());
    assert!(e.to_string().contains("completed"));
  }
}
