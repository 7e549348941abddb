//! SQL schema for the Titra SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS prescriptions (
    prescription_id   TEXT PRIMARY KEY,
    patient_id        TEXT NOT NULL,
    prescriber_id     TEXT NOT NULL,
    dose_schedule     TEXT NOT NULL,   -- JSON array of stages; never updated
    refills_remaining INTEGER NOT NULL CHECK (refills_remaining >= 0),
    status            TEXT NOT NULL,   -- PrescriptionStatus, snake_case
    start_date        TEXT NOT NULL,   -- YYYY-MM-DD
    end_date          TEXT,
    replaces          TEXT REFERENCES prescriptions(prescription_id),
    replaced_by       TEXT REFERENCES prescriptions(prescription_id),
    created_at        TEXT NOT NULL    -- RFC 3339 UTC
);

CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id           TEXT PRIMARY KEY,
    prescription_id           TEXT NOT NULL REFERENCES prescriptions(prescription_id),
    patient_id                TEXT NOT NULL,
    external_customer_ref     TEXT NOT NULL,
    external_subscription_ref TEXT,
    status                    TEXT NOT NULL,   -- SubscriptionStatus, snake_case
    next_charge_date          TEXT NOT NULL,
    created_at                TEXT NOT NULL
);

-- One live subscription per prescription.
CREATE UNIQUE INDEX IF NOT EXISTS subscriptions_live_idx
    ON subscriptions(prescription_id) WHERE status != 'cancelled';

-- Write-once. The primary key is the idempotency guarantee.
CREATE TABLE IF NOT EXISTS fulfillment_ledger (
    external_event_id     TEXT PRIMARY KEY,
    prescription_id       TEXT NOT NULL REFERENCES prescriptions(prescription_id),
    stage_index_dispensed INTEGER NOT NULL CHECK (stage_index_dispensed >= 0),
    order_ref             TEXT NOT NULL,
    created_at            TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS fulfillment_ledger_no_update
    BEFORE UPDATE ON fulfillment_ledger
BEGIN
    SELECT RAISE(ABORT, 'fulfillment ledger entries are write-once');
END;

CREATE TRIGGER IF NOT EXISTS fulfillment_ledger_no_delete
    BEFORE DELETE ON fulfillment_ledger
BEGIN
    SELECT RAISE(ABORT, 'fulfillment ledger entries are write-once');
END;

CREATE INDEX IF NOT EXISTS prescriptions_patient_idx ON prescriptions(patient_id);
CREATE INDEX IF NOT EXISTS subscriptions_rx_idx      ON subscriptions(prescription_id);
CREATE INDEX IF NOT EXISTS ledger_rx_idx             ON fulfillment_ledger(prescription_id);

PRAGMA user_version = 1;
";
