//! Inbound billing signals and outbound lifecycle notifications.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

// ─── Inbound ─────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingEventType {
  /// Checkout for the first dispensation completed.
  Initial,
  /// A subscription billing cycle completed.
  Renewal,
  /// The billing provider cancelled the subscription.
  Cancellation,
}

/// A billing signal. Delivered at least once, in any order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
  /// The provider's invoice or order identifier; the idempotency key.
  pub external_event_id: String,
  pub prescription_id:   Uuid,
  pub event_type:        BillingEventType,
}

// ─── Outbound ────────────────────────────────────────────────────────────────

/// Why a subscription was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CancellationReason {
  /// The dose schedule ran out.
  ScheduleCompleted,
  /// A provider cancelled the prescription.
  PrescriptionCancelled,
  /// A superseding prescription replaced this one.
  PrescriptionReplaced,
  /// The billing provider cancelled the subscription.
  BillingCancelled,
}

/// A lifecycle change for the notification collaborator to render and send.
///
/// Emitted once per transition; never re-derived by polling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
  DoseAdvanced {
    prescription_id: Uuid,
    patient_id:      Uuid,
    from_stage:      u32,
    to_stage:        u32,
    dose_label:      String,
  },
  SubscriptionCancelled {
    subscription_id: Uuid,
    prescription_id: Uuid,
    patient_id:      Uuid,
    reason:          CancellationReason,
  },
  PrescriptionCompleted {
    prescription_id: Uuid,
    patient_id:      Uuid,
  },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn billing_event_wire_shape() {
    let event: BillingEvent = serde_json::from_value(serde_json::json!({
      "external_event_id": "in_123",
      "prescription_id":   Uuid::nil(),
      "event_type":        "renewal",
    }))
    .unwrap();
    assert_eq!(event.event_type, BillingEventType::Renewal);
    assert_eq!(event.external_event_id, "in_123");
  }

  #[test]
  fn notification_is_tagged() {
    let n = Notification::PrescriptionCompleted {
      prescription_id: Uuid::nil(),
      patient_id:      Uuid::nil(),
    };
    let json = serde_json::to_value(&n).unwrap();
    assert_eq!(json["type"], "prescription_completed");
  }
}
