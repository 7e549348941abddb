//! Dose schedules: the ordered escalation path baked into a prescription.
//!
//! A schedule is authored once by a provider and never reordered or
//! recomputed. Stage order is the clinical escalation order.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One step in a dose-escalation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseStage {
  /// Zero-based position in the schedule.
  pub stage_index:        u32,
  /// Human-readable dose, e.g. `"0.25 mg"`.
  pub dose_label:         String,
  /// External catalog product variant dispensed at this stage.
  pub catalog_variant_id: String,
  /// External billing price attached to the variant.
  pub price_id:           String,
}

/// An immutable, zero-based, gapless sequence of [`DoseStage`]s.
///
/// Construct new schedules with [`DoseSchedule::new`], which validates
/// ordering. Schedules read back from storage are not re-validated; every
/// lookup tolerates an empty or malformed schedule by returning `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoseSchedule {
  stages: Vec<DoseStage>,
}

impl DoseSchedule {
  /// Validate and wrap a provider-authored list of stages.
  pub fn new(stages: Vec<DoseStage>) -> Result<Self> {
    if stages.is_empty() {
      return Err(Error::InvalidSchedule("schedule has no stages".into()));
    }
    for (position, stage) in stages.iter().enumerate() {
      if stage.stage_index as usize != position {
        return Err(Error::InvalidSchedule(format!(
          "stage at position {position} has index {}; indices must be contiguous from 0",
          stage.stage_index
        )));
      }
    }
    Ok(Self { stages })
  }

  pub fn stages(&self) -> &[DoseStage] { &self.stages }

  pub fn len(&self) -> usize { self.stages.len() }

  pub fn is_empty(&self) -> bool { self.stages.is_empty() }

  /// Highest stage index, or `None` for an empty schedule.
  pub fn max_stage(&self) -> Option<u32> {
    self.stages.len().checked_sub(1).map(|m| m as u32)
  }

  /// Look up a stage by index. Out-of-range indices yield `None`.
  pub fn stage(&self, index: u32) -> Option<&DoseStage> {
    self
      .stages
      .get(index as usize)
      .filter(|stage| stage.stage_index == index)
  }
}

#[cfg(test)]
pub(crate) fn stage(index: u32, label: &str) -> DoseStage {
  DoseStage {
    stage_index:        index,
    dose_label:         label.into(),
    catalog_variant_id: format!("variant_{index}"),
    price_id:           format!("price_{index}"),
  }
}
