//! Engine tuning knobs.

use std::time::Duration;

use serde::Deserialize;

/// Runtime configuration for [`crate::RecurringFulfillmentProcessor`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound on each catalog or order call, in milliseconds.
  pub collaborator_timeout_ms: u64,
  /// Days added to a subscription's next charge date per dispensation.
  pub billing_cycle_days:      u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      collaborator_timeout_ms: 10_000,
      billing_cycle_days:      30,
    }
  }
}

impl EngineConfig {
  pub fn collaborator_timeout(&self) -> Duration {
    Duration::from_millis(self.collaborator_timeout_ms)
  }

  pub fn billing_cycle(&self) -> chrono::Days {
    chrono::Days::new(u64::from(self.billing_cycle_days))
  }
}
