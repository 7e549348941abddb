//! Dose progression: maps a refill counter onto a schedule position.
//!
//! Refills count down from the end of the schedule toward zero, so the
//! number of stages already consumed is `max_stage - refills_remaining + 1`.
//! The schedule stays read-only and the refill counter is the only state a
//! renewal needs to persist.
//!
//! Everything here is pure. "No stage" always means nothing further to
//! dispense; callers never see a panic for an empty schedule or an
//! out-of-range counter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  prescription::{Prescription, PrescriptionStatus},
  schedule::{DoseSchedule, DoseStage},
};

/// The first dispensation of every prescription.
pub const INITIAL_STAGE_INDEX: u32 = 0;

/// Where a renewal lands on the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResolution {
  /// This stage is due.
  Due(u32),
  /// The counter has run past the end of the schedule; titration is over.
  Exhausted,
  /// More refills remain than the schedule has stages. Data corruption.
  RefillsExceedSchedule,
  /// The schedule has no stages.
  EmptySchedule,
}

impl StageResolution {
  pub fn stage_index(self) -> Option<u32> {
    match self {
      Self::Due(index) => Some(index),
      _ => None,
    }
  }
}

/// Resolve the stage due for a renewal, distinguishing the reasons a stage
/// may be missing.
pub fn resolve_current_stage(
  refills_remaining: u32,
  max_stage: Option<u32>,
) -> StageResolution {
  let Some(max_stage) = max_stage else {
    return StageResolution::EmptySchedule;
  };
  let consumed = i64::from(max_stage) - i64::from(refills_remaining) + 1;
  if consumed < 0 {
    StageResolution::RefillsExceedSchedule
  } else if consumed > i64::from(max_stage) {
    StageResolution::Exhausted
  } else {
    StageResolution::Due(consumed as u32)
  }
}

/// Index of the stage due for a renewal, or `None` when nothing is left.
pub fn current_stage_index(refills_remaining: u32, max_stage: Option<u32>) -> Option<u32> {
  resolve_current_stage(refills_remaining, max_stage).stage_index()
}

/// Index of the first dispensation; independent of the refill counter.
pub fn initial_stage_index() -> u32 { INITIAL_STAGE_INDEX }

/// Index of the stage after the current one, if the schedule has one.
pub fn next_stage_index(refills_remaining: u32, max_stage: Option<u32>) -> Option<u32> {
  let next = current_stage_index(refills_remaining, max_stage)?.checked_add(1)?;
  (next <= max_stage?).then_some(next)
}

pub fn should_advance(refills_remaining: u32, max_stage: Option<u32>) -> bool {
  next_stage_index(refills_remaining, max_stage).is_some()
}

/// The stage a renewal would dispense from `schedule`.
pub fn renewal_stage(schedule: &DoseSchedule, refills_remaining: u32) -> Option<&DoseStage> {
  current_stage_index(refills_remaining, schedule.max_stage())
    .and_then(|index| schedule.stage(index))
}

/// The stage an initial order dispenses from `schedule`.
pub fn initial_stage(schedule: &DoseSchedule) -> Option<&DoseStage> {
  schedule.stage(initial_stage_index())
}

// ─── Read model ──────────────────────────────────────────────────────────────

/// A snapshot of where a prescription sits on its titration path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DosePreview {
  pub prescription_id:     Uuid,
  pub status:              PrescriptionStatus,
  pub refills_remaining:   u32,
  pub max_stage:           Option<u32>,
  /// The stage the next renewal would dispense; `None` at end of titration.
  pub next_renewal_stage:  Option<DoseStage>,
  /// Whether another stage follows the next renewal's stage.
  pub advances_after:      bool,
  /// Set when the refill counter is deeper than the schedule.
  pub invariant_violation: bool,
}

impl DosePreview {
  pub fn of(prescription: &Prescription) -> Self {
    let schedule = &prescription.dose_schedule;
    let refills = prescription.refills_remaining;
    let resolution = resolve_current_stage(refills, schedule.max_stage());
    // A closed prescription never renews, whatever its counter says.
    let open = !prescription.status.is_terminal();
    Self {
      prescription_id:     prescription.id,
      status:              prescription.status,
      refills_remaining:   refills,
      max_stage:           schedule.max_stage(),
      next_renewal_stage:  renewal_stage(schedule, refills).filter(|_| open).cloned(),
      advances_after:      open && should_advance(refills, schedule.max_stage()),
      invariant_violation: resolution == StageResolution::RefillsExceedSchedule,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schedule::stage;

  fn three_stages() -> DoseSchedule {
    DoseSchedule::new(vec![stage(0, "0.25 mg"), stage(1, "0.5 mg"), stage(2, "1 mg")])
      .unwrap()
  }

  #[test]
  fn three_stage_schedule_walks_forward_as_refills_drop() {
    assert_eq!(current_stage_index(2, Some(2)), Some(1));
    assert_eq!(current_stage_index(1, Some(2)), Some(2));
    assert_eq!(current_stage_index(0, Some(2)), None);
    assert_eq!(resolve_current_stage(0, Some(2)), StageResolution::Exhausted);
  }

  #[test]
  fn current_stage_matches_formula_for_every_depth() {
    for n in 1u32..=8 {
      let max_stage = n - 1;
      for refills in 0..n {
        let expected = max_stage + 1 - refills;
        let got = current_stage_index(refills, Some(max_stage));
        if expected <= max_stage {
          assert_eq!(got, Some(expected), "n={n} refills={refills}");
        } else {
          assert_eq!(got, None, "n={n} refills={refills}");
        }
      }
    }
  }

  #[test]
  fn refills_deeper_than_schedule_is_flagged() {
    assert_eq!(
      resolve_current_stage(4, Some(2)),
      StageResolution::RefillsExceedSchedule
    );
    assert_eq!(current_stage_index(4, Some(2)), None);
    assert!(!should_advance(4, Some(2)));
  }

  #[test]
  fn refills_equal_to_depth_points_at_stage_zero() {
    // consumed = 2 - 3 + 1 = 0
    assert_eq!(current_stage_index(3, Some(2)), Some(0));
  }

  #[test]
  fn initial_stage_ignores_refills() {
    let schedule = three_stages();
    for _refills in [2, 1, 0] {
      assert_eq!(initial_stage_index(), 0);
      assert_eq!(initial_stage(&schedule).unwrap().stage_index, 0);
    }
  }

  #[test]
  fn next_stage_and_advance() {
    assert_eq!(next_stage_index(2, Some(2)), Some(2));
    assert!(should_advance(2, Some(2)));
    assert_eq!(next_stage_index(1, Some(2)), None);
    assert!(!should_advance(1, Some(2)));
    assert_eq!(next_stage_index(0, Some(2)), None);
  }

  #[test]
  fn single_stage_schedule_has_nothing_to_renew() {
    assert_eq!(current_stage_index(0, Some(0)), None);
    assert_eq!(current_stage_index(1, Some(0)), Some(0));
    assert!(!should_advance(1, Some(0)));
  }

  #[test]
  fn empty_schedule_never_yields_a_stage() {
    let empty = DoseSchedule::default();
    for refills in [0, 1, 5, u32::MAX] {
      assert_eq!(current_stage_index(refills, empty.max_stage()), None);
      assert_eq!(next_stage_index(refills, empty.max_stage()), None);
      assert!(!should_advance(refills, empty.max_stage()));
      assert!(renewal_stage(&empty, refills).is_none());
    }
    assert!(initial_stage(&empty).is_none());
  }

  #[test]
  fn extreme_counters_do_not_overflow() {
    assert_eq!(
      resolve_current_stage(u32::MAX, Some(u32::MAX)),
      StageResolution::Due(1)
    );
    assert_eq!(resolve_current_stage(0, Some(u32::MAX)), StageResolution::Exhausted);
    assert_eq!(next_stage_index(1, Some(u32::MAX)), None);
  }

  #[test]
  fn preview_of_closed_prescription_has_no_next_stage() {
    use crate::prescription::prescription;

    let open = DosePreview::of(&prescription(2, PrescriptionStatus::Active));
    assert_eq!(open.next_renewal_stage.unwrap().stage_index, 1);
    assert!(open.advances_after);

    for status in [
      PrescriptionStatus::Cancelled,
      PrescriptionStatus::Replaced,
      PrescriptionStatus::Completed,
    ] {
      let closed = DosePreview::of(&prescription(2, status));
      assert!(closed.next_renewal_stage.is_none(), "{status}");
      assert!(!closed.advances_after, "{status}");
      assert_eq!(closed.refills_remaining, 2);
    }
  }

  #[test]
  fn renewal_stage_resolves_through_schedule() {
    let schedule = three_stages();
    assert_eq!(renewal_stage(&schedule, 2).unwrap().dose_label, "0.5 mg");
    assert_eq!(renewal_stage(&schedule, 1).unwrap().dose_label, "1 mg");
    assert!(renewal_stage(&schedule, 0).is_none());
  }
}
