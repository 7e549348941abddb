//! [`SqliteStore`], the SQLite implementation of [`TreatmentStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use titra_core::{
  ledger::FulfillmentLedgerEntry,
  prescription::{Prescription, PrescriptionStatus},
  store::{CommitOutcome, FulfillmentCommit, LifecycleChange, SubscriptionWrite, TreatmentStore},
  subscription::{Subscription, SubscriptionStatus},
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    LEDGER_COLUMNS, PRESCRIPTION_COLUMNS, RawLedgerEntry, RawPrescription, RawSubscription,
    SUBSCRIPTION_COLUMNS, encode_date, encode_dt, encode_prescription_status, encode_schedule,
    encode_subscription_status, encode_uuid,
  },
  error::Error,
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Titra treatment store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Encoded rows ────────────────────────────────────────────────────────────

/// A prescription encoded for writing.
struct PrescriptionRow {
  id:                String,
  patient_id:        String,
  prescriber_id:     String,
  dose_schedule:     String,
  refills_remaining: u32,
  status:            &'static str,
  start_date:        String,
  end_date:          Option<String>,
  replaces:          Option<String>,
  replaced_by:       Option<String>,
  created_at:        String,
}

impl PrescriptionRow {
  fn encode(p: &Prescription) -> Result<Self> {
    Ok(Self {
      id:                encode_uuid(p.id),
      patient_id:        encode_uuid(p.patient_id),
      prescriber_id:     encode_uuid(p.prescriber_id),
      dose_schedule:     encode_schedule(&p.dose_schedule)?,
      refills_remaining: p.refills_remaining,
      status:            encode_prescription_status(p.status),
      start_date:        encode_date(p.start_date),
      end_date:          p.end_date.map(encode_date),
      replaces:          p.replaces.map(encode_uuid),
      replaced_by:       p.replaced_by.map(encode_uuid),
      created_at:        encode_dt(p.created_at),
    })
  }

  fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    conn.execute(
      &format!(
        "INSERT INTO prescriptions ({PRESCRIPTION_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
      ),
      rusqlite::params![
        self.id,
        self.patient_id,
        self.prescriber_id,
        self.dose_schedule,
        self.refills_remaining,
        self.status,
        self.start_date,
        self.end_date,
        self.replaces,
        self.replaced_by,
        self.created_at,
      ],
    )
  }

  /// Write the mutable lifecycle columns if the stored status still matches.
  /// The schedule and refill counter are never touched here.
  fn update_status(
    &self,
    conn: &rusqlite::Connection,
    expected: &str,
  ) -> rusqlite::Result<usize> {
    conn.execute(
      "UPDATE prescriptions
          SET status = ?1, end_date = ?2, replaced_by = ?3
        WHERE prescription_id = ?4 AND status = ?5",
      rusqlite::params![self.status, self.end_date, self.replaced_by, self.id, expected],
    )
  }
}

/// A subscription encoded for writing.
struct SubscriptionRow {
  id:                        String,
  prescription_id:           String,
  patient_id:                String,
  external_customer_ref:     String,
  external_subscription_ref: Option<String>,
  status:                    &'static str,
  next_charge_date:          String,
  created_at:                String,
}

impl SubscriptionRow {
  fn encode(s: &Subscription) -> Self {
    Self {
      id:                        encode_uuid(s.id),
      prescription_id:           encode_uuid(s.prescription_id),
      patient_id:                encode_uuid(s.patient_id),
      external_customer_ref:     s.external_customer_ref.clone(),
      external_subscription_ref: s.external_subscription_ref.clone(),
      status:                    encode_subscription_status(s.status),
      next_charge_date:          encode_date(s.next_charge_date),
      created_at:                encode_dt(s.created_at),
    }
  }

  fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    conn.execute(
      &format!(
        "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
      ),
      rusqlite::params![
        self.id,
        self.prescription_id,
        self.patient_id,
        self.external_customer_ref,
        self.external_subscription_ref,
        self.status,
        self.next_charge_date,
        self.created_at,
      ],
    )
  }

  fn update_status(
    &self,
    conn: &rusqlite::Connection,
    expected: &str,
  ) -> rusqlite::Result<usize> {
    conn.execute(
      "UPDATE subscriptions
          SET status = ?1, next_charge_date = ?2
        WHERE subscription_id = ?3 AND status = ?4",
      rusqlite::params![self.status, self.next_charge_date, self.id, expected],
    )
  }
}

enum EncodedSubscriptionWrite {
  Insert(SubscriptionRow),
  Update(SubscriptionRow, &'static str),
}

/// What the commit transaction saw, before decoding.
enum RawCommit {
  Committed,
  Duplicate(RawLedgerEntry),
  StaleRefills,
}

// ─── TreatmentStore impl ─────────────────────────────────────────────────────

impl TreatmentStore for SqliteStore {
  type Error = Error;

  // ── Prescriptions ─────────────────────────────────────────────────────────

  async fn insert_prescription(&self, prescription: &Prescription) -> Result<()> {
    let row = PrescriptionRow::encode(prescription)?;
    self
      .conn
      .call(move |conn| {
        row.insert(conn)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawPrescription> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE prescription_id = ?1"
              ),
              rusqlite::params![id_str],
              RawPrescription::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPrescription::into_prescription).transpose()
  }

  async fn list_prescriptions(&self, patient_id: Option<Uuid>) -> Result<Vec<Prescription>> {
    let patient_str = patient_id.map(encode_uuid);

    let raws: Vec<RawPrescription> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions
            WHERE ?1 IS NULL OR patient_id = ?1
            ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![patient_str], RawPrescription::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPrescription::into_prescription).collect()
  }

  async fn apply_lifecycle_change(&self, change: &LifecycleChange) -> Result<bool> {
    let primary   = PrescriptionRow::encode(&change.prescription)?;
    let expected  = encode_prescription_status(change.expected_status);
    let successor = change
      .successor
      .as_ref()
      .map(PrescriptionRow::encode)
      .transpose()?;
    let subscription = change.subscription.as_ref().map(|write| match write {
      SubscriptionWrite::Insert(s) => EncodedSubscriptionWrite::Insert(SubscriptionRow::encode(s)),
      SubscriptionWrite::Update { subscription, expected_status } => {
        EncodedSubscriptionWrite::Update(
          SubscriptionRow::encode(subscription),
          encode_subscription_status(*expected_status),
        )
      }
    });

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // The successor goes first so the `replaced_by` reference resolves.
        if let Some(successor) = &successor {
          successor.insert(&tx)?;
        }

        if primary.update_status(&tx, expected)? == 0 {
          return Ok(false);
        }

        match &subscription {
          Some(EncodedSubscriptionWrite::Insert(row)) => {
            row.insert(&tx)?;
          }
          Some(EncodedSubscriptionWrite::Update(row, expected)) => {
            if row.update_status(&tx, expected)? == 0 {
              return Ok(false);
            }
          }
          None => {}
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(applied)
  }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSubscription> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = ?1"
              ),
              rusqlite::params![id_str],
              RawSubscription::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSubscription::into_subscription).transpose()
  }

  async fn subscription_for_prescription(
    &self,
    prescription_id: Uuid,
  ) -> Result<Option<Subscription>> {
    let id_str = encode_uuid(prescription_id);

    let raw: Option<RawSubscription> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                  WHERE prescription_id = ?1
                  ORDER BY created_at DESC, rowid DESC
                  LIMIT 1"
              ),
              rusqlite::params![id_str],
              RawSubscription::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSubscription::into_subscription).transpose()
  }

  async fn update_subscription(
    &self,
    subscription: &Subscription,
    expected_status: SubscriptionStatus,
  ) -> Result<bool> {
    let row      = SubscriptionRow::encode(subscription);
    let expected = encode_subscription_status(expected_status);

    let updated = self
      .conn
      .call(move |conn| Ok(row.update_status(conn, expected)?))
      .await?;

    Ok(updated == 1)
  }

  // ── Fulfillment ledger ────────────────────────────────────────────────────

  async fn ledger_entry(&self, external_event_id: &str) -> Result<Option<FulfillmentLedgerEntry>> {
    let event_id = external_event_id.to_owned();

    let raw: Option<RawLedgerEntry> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LEDGER_COLUMNS} FROM fulfillment_ledger WHERE external_event_id = ?1"
              ),
              rusqlite::params![event_id],
              RawLedgerEntry::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLedgerEntry::into_entry).transpose()
  }

  async fn ledger_for_prescription(
    &self,
    prescription_id: Uuid,
  ) -> Result<Vec<FulfillmentLedgerEntry>> {
    let id_str = encode_uuid(prescription_id);

    let raws: Vec<RawLedgerEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LEDGER_COLUMNS} FROM fulfillment_ledger
            WHERE prescription_id = ?1
            ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawLedgerEntry::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLedgerEntry::into_entry).collect()
  }

  async fn commit_fulfillment(&self, commit: &FulfillmentCommit) -> Result<CommitOutcome> {
    let entry            = commit.entry.clone();
    let event_id         = entry.external_event_id.clone();
    let prescription_id  = encode_uuid(entry.prescription_id);
    let stage_index      = entry.stage_index_dispensed;
    let order_ref        = entry.order_ref.clone();
    let created_at       = encode_dt(entry.created_at);
    let expected_refills = commit.expected_refills;
    let refills_after    = commit.refills_after;
    let subscription_id  = encode_uuid(commit.subscription_id);
    let next_charge_date = encode_date(commit.next_charge_date);
    let active           = encode_prescription_status(PrescriptionStatus::Active);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let inserted = tx.execute(
          &format!(
            "INSERT INTO fulfillment_ledger ({LEDGER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (external_event_id) DO NOTHING"
          ),
          rusqlite::params![event_id, prescription_id, stage_index, order_ref, created_at],
        )?;
        if inserted == 0 {
          let existing = tx.query_row(
            &format!(
              "SELECT {LEDGER_COLUMNS} FROM fulfillment_ledger WHERE external_event_id = ?1"
            ),
            rusqlite::params![event_id],
            RawLedgerEntry::from_row,
          )?;
          return Ok(RawCommit::Duplicate(existing));
        }

        let moved = tx.execute(
          "UPDATE prescriptions
              SET refills_remaining = ?1
            WHERE prescription_id = ?2 AND refills_remaining = ?3 AND status = ?4",
          rusqlite::params![refills_after, prescription_id, expected_refills, active],
        )?;
        if moved == 0 {
          return Ok(RawCommit::StaleRefills);
        }

        tx.execute(
          "UPDATE subscriptions
              SET next_charge_date = ?1
            WHERE subscription_id = ?2 AND status != 'cancelled'",
          rusqlite::params![next_charge_date, subscription_id],
        )?;

        tx.commit()?;
        Ok(RawCommit::Committed)
      })
      .await?;

    Ok(match raw {
      RawCommit::Committed => CommitOutcome::Committed(entry),
      RawCommit::Duplicate(existing) => CommitOutcome::Duplicate(existing.into_entry()?),
      RawCommit::StaleRefills => CommitOutcome::StaleRefills,
    })
  }
}
