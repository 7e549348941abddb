//! Subscriptions and their lifecycle state machine.
//!
//! `active <-> paused`, and either may move to the terminal `cancelled`.
//! A prescription has at most one live subscription at a time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{
  Error, Result,
  event::{CancellationReason, Notification},
};

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
pub enum SubscriptionStatus {
  Active,
  Paused,
  Cancelled,
}

impl SubscriptionStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Cancelled) }

  pub fn allowed_transitions(self) -> &'static [SubscriptionStatus] {
    match self {
      Self::Active => &[Self::Paused, Self::Cancelled],
      Self::Paused => &[Self::Active, Self::Cancelled],
      Self::Cancelled => &[],
    }
  }

  pub fn can_transition_to(self, to: SubscriptionStatus) -> bool {
    self.allowed_transitions().contains(&to)
  }

  pub fn validate_transition(self, to: SubscriptionStatus) -> Result<()> {
    if self.can_transition_to(to) {
      Ok(())
    } else {
      Err(Error::InvalidTransition {
        entity: "subscription",
        from:   self.into(),
        to:     to.into(),
      })
    }
  }
}

/// The recurring billing arrangement attached to an active prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
  pub id:                        Uuid,
  pub prescription_id:           Uuid,
  pub patient_id:                Uuid,
  pub external_customer_ref:     String,
  pub external_subscription_ref: Option<String>,
  pub status:                    SubscriptionStatus,
  pub next_charge_date:          NaiveDate,
  pub created_at:                DateTime<Utc>,
}

impl Subscription {
  pub fn transition(&mut self, to: SubscriptionStatus) -> Result<SubscriptionStatus> {
    self.status.validate_transition(to)?;
    let previous = self.status;
    self.status = to;
    Ok(previous)
  }

  /// Cancel the subscription. Returns the notification for this transition,
  /// or `None` when it was already cancelled.
  pub fn cancel(&mut self, reason: CancellationReason) -> Option<Notification> {
    if self.status.is_terminal() {
      return None;
    }
    self.status = SubscriptionStatus::Cancelled;
    Some(Notification::SubscriptionCancelled {
      subscription_id: self.id,
      prescription_id: self.prescription_id,
      patient_id: self.patient_id,
      reason,
    })
  }
}

/// Billing details captured when a prescription becomes active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionTerms {
  pub external_customer_ref:     String,
  #[serde(default)]
  pub external_subscription_ref: Option<String>,
  pub first_charge_date:         NaiveDate,
}

impl SubscriptionTerms {
  pub fn into_subscription(
    self,
    id: Uuid,
    prescription_id: Uuid,
    patient_id: Uuid,
    now: DateTime<Utc>,
  ) -> Subscription {
    Subscription {
      id,
      prescription_id,
      patient_id,
      external_customer_ref: self.external_customer_ref,
      external_subscription_ref: self.external_subscription_ref,
      status: SubscriptionStatus::Active,
      next_charge_date: self.first_charge_date,
      created_at: now,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn subscription(status: SubscriptionStatus) -> Subscription {
    SubscriptionTerms {
      external_customer_ref:     "cus_1".into(),
      external_subscription_ref: Some("sub_1".into()),
      first_charge_date:         NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
    }
    .into_subscription(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    .with_status(status)
  }

  impl Subscription {
    fn with_status(mut self, status: SubscriptionStatus) -> Self {
      self.status = status;
      self
    }
  }

  #[test]
  fn pause_and_resume() {
    let mut s = subscription(SubscriptionStatus::Active);
    s.transition(SubscriptionStatus::Paused).unwrap();
    s.transition(SubscriptionStatus::Active).unwrap();
    assert_eq!(s.status, SubscriptionStatus::Active);
  }

  #[test]
  fn cancelled_is_terminal() {
    let mut s = subscription(SubscriptionStatus::Cancelled);
    for to in [SubscriptionStatus::Active, SubscriptionStatus::Paused] {
      assert!(matches!(
        s.transition(to),
        Err(Error::InvalidTransition { entity: "subscription", .. })
      ));
    }
  }

  #[test]
  fn cancel_notifies_exactly_once() {
    let mut s = subscription(SubscriptionStatus::Paused);
    let first = s.cancel(CancellationReason::ScheduleCompleted);
    assert!(matches!(
      first,
      Some(Notification::SubscriptionCancelled {
        reason: CancellationReason::ScheduleCompleted,
        ..
      })
    ));
    assert_eq!(s.status, SubscriptionStatus::Cancelled);
    assert_eq!(s.cancel(CancellationReason::BillingCancelled), None);
  }
}
