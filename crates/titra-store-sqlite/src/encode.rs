//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates are `YYYY-MM-DD`, statuses
//! are their snake_case names, and the dose schedule is a compact JSON array.
//! UUIDs are stored as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use titra_core::{
  ledger::FulfillmentLedgerEntry,
  prescription::{Prescription, PrescriptionStatus},
  schedule::DoseSchedule,
  subscription::{Subscription, SubscriptionStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── Time ─────────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::Decode(format!("date {s:?}: {e}")))
}

// ─── Statuses ─────────────────────────────────────────────────────────────────

pub fn encode_prescription_status(s: PrescriptionStatus) -> &'static str { s.into() }

pub fn decode_prescription_status(s: &str) -> Result<PrescriptionStatus> {
  PrescriptionStatus::from_str(s)
    .map_err(|_| Error::Decode(format!("unknown prescription status: {s:?}")))
}

pub fn encode_subscription_status(s: SubscriptionStatus) -> &'static str { s.into() }

pub fn decode_subscription_status(s: &str) -> Result<SubscriptionStatus> {
  SubscriptionStatus::from_str(s)
    .map_err(|_| Error::Decode(format!("unknown subscription status: {s:?}")))
}

// ─── Dose schedule ───────────────────────────────────────────────────────────

pub fn encode_schedule(schedule: &DoseSchedule) -> Result<String> {
  Ok(serde_json::to_string(schedule)?)
}

/// Stored schedules are not re-validated; an empty array decodes to an empty
/// schedule.
pub fn decode_schedule(s: &str) -> Result<DoseSchedule> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const PRESCRIPTION_COLUMNS: &str = "prescription_id, patient_id, prescriber_id, \
   dose_schedule, refills_remaining, status, start_date, end_date, replaces, replaced_by, \
   created_at";

/// Raw values read directly from a `prescriptions` row.
pub struct RawPrescription {
  pub prescription_id:   String,
  pub patient_id:        String,
  pub prescriber_id:     String,
  pub dose_schedule:     String,
  pub refills_remaining: u32,
  pub status:            String,
  pub start_date:        String,
  pub end_date:          Option<String>,
  pub replaces:          Option<String>,
  pub replaced_by:       Option<String>,
  pub created_at:        String,
}

impl RawPrescription {
  /// Read a row selected with [`PRESCRIPTION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      prescription_id:   row.get(0)?,
      patient_id:        row.get(1)?,
      prescriber_id:     row.get(2)?,
      dose_schedule:     row.get(3)?,
      refills_remaining: row.get(4)?,
      status:            row.get(5)?,
      start_date:        row.get(6)?,
      end_date:          row.get(7)?,
      replaces:          row.get(8)?,
      replaced_by:       row.get(9)?,
      created_at:        row.get(10)?,
    })
  }

  pub fn into_prescription(self) -> Result<Prescription> {
    Ok(Prescription {
      id:                decode_uuid(&self.prescription_id)?,
      patient_id:        decode_uuid(&self.patient_id)?,
      prescriber_id:     decode_uuid(&self.prescriber_id)?,
      dose_schedule:     decode_schedule(&self.dose_schedule)?,
      refills_remaining: self.refills_remaining,
      status:            decode_prescription_status(&self.status)?,
      start_date:        decode_date(&self.start_date)?,
      end_date:          self.end_date.as_deref().map(decode_date).transpose()?,
      replaces:          self.replaces.as_deref().map(decode_uuid).transpose()?,
      replaced_by:       self.replaced_by.as_deref().map(decode_uuid).transpose()?,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

pub const SUBSCRIPTION_COLUMNS: &str = "subscription_id, prescription_id, patient_id, \
   external_customer_ref, external_subscription_ref, status, next_charge_date, created_at";

/// Raw values read directly from a `subscriptions` row.
pub struct RawSubscription {
  pub subscription_id:           String,
  pub prescription_id:           String,
  pub patient_id:                String,
  pub external_customer_ref:     String,
  pub external_subscription_ref: Option<String>,
  pub status:                    String,
  pub next_charge_date:          String,
  pub created_at:                String,
}

impl RawSubscription {
  /// Read a row selected with [`SUBSCRIPTION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subscription_id:           row.get(0)?,
      prescription_id:           row.get(1)?,
      patient_id:                row.get(2)?,
      external_customer_ref:     row.get(3)?,
      external_subscription_ref: row.get(4)?,
      status:                    row.get(5)?,
      next_charge_date:          row.get(6)?,
      created_at:                row.get(7)?,
    })
  }

  pub fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      id:                        decode_uuid(&self.subscription_id)?,
      prescription_id:           decode_uuid(&self.prescription_id)?,
      patient_id:                decode_uuid(&self.patient_id)?,
      external_customer_ref:     self.external_customer_ref,
      external_subscription_ref: self.external_subscription_ref,
      status:                    decode_subscription_status(&self.status)?,
      next_charge_date:          decode_date(&self.next_charge_date)?,
      created_at:                decode_dt(&self.created_at)?,
    })
  }
}

pub const LEDGER_COLUMNS: &str =
  "external_event_id, prescription_id, stage_index_dispensed, order_ref, created_at";

/// Raw values read directly from a `fulfillment_ledger` row.
pub struct RawLedgerEntry {
  pub external_event_id:     String,
  pub prescription_id:       String,
  pub stage_index_dispensed: u32,
  pub order_ref:             String,
  pub created_at:            String,
}

impl RawLedgerEntry {
  /// Read a row selected with [`LEDGER_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      external_event_id:     row.get(0)?,
      prescription_id:       row.get(1)?,
      stage_index_dispensed: row.get(2)?,
      order_ref:             row.get(3)?,
      created_at:            row.get(4)?,
    })
  }

  pub fn into_entry(self) -> Result<FulfillmentLedgerEntry> {
    Ok(FulfillmentLedgerEntry {
      external_event_id:     self.external_event_id,
      prescription_id:       decode_uuid(&self.prescription_id)?,
      stage_index_dispensed: self.stage_index_dispensed,
      order_ref:             self.order_ref,
      created_at:            decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dates_roundtrip() {
    let d = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
    assert_eq!(encode_date(d), "2026-02-28");
    assert_eq!(decode_date("2026-02-28").unwrap(), d);
    assert!(matches!(decode_date("28/02/2026"), Err(Error::Decode(_))));
  }

  #[test]
  fn statuses_use_snake_case() {
    assert_eq!(
      encode_prescription_status(PrescriptionStatus::PendingPayment),
      "pending_payment"
    );
    assert_eq!(
      decode_subscription_status("paused").unwrap(),
      SubscriptionStatus::Paused
    );
    assert!(decode_prescription_status("archived").is_err());
  }

  #[test]
  fn empty_stored_schedule_decodes() {
    let schedule = decode_schedule("[]").unwrap();
    assert!(schedule.is_empty());
  }
}
