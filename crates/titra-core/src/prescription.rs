//! Prescriptions and their lifecycle state machine.
//!
//! ```text
//! pending_payment -> pending_signature -> active -> completed
//!                          |                 |---> cancelled
//!                          |                 '---> replaced
//!                          '-------------------------^
//! ```
//!
//! `completed`, `cancelled` and `replaced` are terminal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{
  Error, Result,
  schedule::{DoseSchedule, DoseStage},
};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrescriptionStatus {
  PendingPayment,
  PendingSignature,
  Active,
  Completed,
  Cancelled,
  Replaced,
}

impl PrescriptionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Cancelled | Self::Replaced)
  }

  /// Every status reachable from `self` in one step.
  pub fn allowed_transitions(self) -> &'static [PrescriptionStatus] {
    match self {
      Self::PendingPayment => &[Self::PendingSignature],
      Self::PendingSignature => &[Self::Active, Self::Replaced],
      Self::Active => &[Self::Completed, Self::Cancelled, Self::Replaced],
      Self::Completed | Self::Cancelled | Self::Replaced => &[],
    }
  }

  pub fn can_transition_to(self, to: PrescriptionStatus) -> bool {
    self.allowed_transitions().contains(&to)
  }

  pub fn validate_transition(self, to: PrescriptionStatus) -> Result<()> {
    if self.can_transition_to(to) {
      Ok(())
    } else {
      Err(Error::InvalidTransition {
        entity: "prescription",
        from:   self.into(),
        to:     to.into(),
      })
    }
  }
}

// ─── Prescription ────────────────────────────────────────────────────────────

/// A provider-authored prescription with a fixed dose schedule.
///
/// Only the fulfillment engine mutates `refills_remaining` and `status`;
/// `replaces`/`replaced_by` are set together by a superseding prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
  pub id:                Uuid,
  pub patient_id:        Uuid,
  pub prescriber_id:     Uuid,
  pub dose_schedule:     DoseSchedule,
  pub refills_remaining: u32,
  pub status:            PrescriptionStatus,
  pub start_date:        NaiveDate,
  /// Set when the prescription reaches a terminal status, unless the
  /// provider fixed one up front.
  pub end_date:          Option<NaiveDate>,
  pub replaces:          Option<Uuid>,
  pub replaced_by:       Option<Uuid>,
  pub created_at:        DateTime<Utc>,
}

impl Prescription {
  pub fn max_stage(&self) -> Option<u32> { self.dose_schedule.max_stage() }

  /// Move to `to` if the state machine allows it. Returns the previous
  /// status.
  pub fn transition(
    &mut self,
    to: PrescriptionStatus,
    on: NaiveDate,
  ) -> Result<PrescriptionStatus> {
    self.status.validate_transition(to)?;
    let previous = self.status;
    self.status = to;
    if to.is_terminal() && self.end_date.is_none() {
      self.end_date = Some(on);
    }
    Ok(previous)
  }
}

// ─── NewPrescription ─────────────────────────────────────────────────────────

/// Input for creating a prescription. The store assigns nothing; the engine
/// supplies the id and creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrescription {
  pub patient_id:        Uuid,
  pub prescriber_id:     Uuid,
  pub dose_schedule:     Vec<DoseStage>,
  /// Renewals authorised after the initial fill. At most the schedule's
  /// highest stage index.
  pub refills_remaining: u32,
  pub start_date:        NaiveDate,
  #[serde(default)]
  pub end_date:          Option<NaiveDate>,
}

impl NewPrescription {
  /// Validate the schedule and build a `pending_payment` prescription.
  pub fn into_prescription(self, id: Uuid, now: DateTime<Utc>) -> Result<Prescription> {
    let dose_schedule = DoseSchedule::new(self.dose_schedule)?;
    let max_stage = dose_schedule.max_stage().unwrap_or_default();
    if self.refills_remaining > max_stage {
      return Err(Error::InvalidSchedule(format!(
        "{} refills exceed the {} renewals the schedule can dispense",
        self.refills_remaining, max_stage
      )));
    }
    Ok(Prescription {
      id,
      patient_id: self.patient_id,
      prescriber_id: self.prescriber_id,
      dose_schedule,
      refills_remaining: self.refills_remaining,
      status: PrescriptionStatus::PendingPayment,
      start_date: self.start_date,
      end_date: self.end_date,
      replaces: None,
      replaced_by: None,
      created_at: now,
    })
  }
}

#[cfg(test)]
pub(crate) fn prescription(refills: u32, status: PrescriptionStatus) -> Prescription {
  use crate::schedule::stage;
  Prescription {
    id: Uuid::new_v4(),
    patient_id: Uuid::new_v4(),
    prescriber_id: Uuid::new_v4(),
    dose_schedule: DoseSchedule::new(vec![stage(0, "a"), stage(1, "b"), stage(2, "c")])
      .unwrap(),
    refills_remaining: refills,
    status,
    start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    end_date: None,
    replaces: None,
    replaced_by: None,
    created_at: Utc::now(),
  }
}
