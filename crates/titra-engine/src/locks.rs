//! Prescription-scoped async locks.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle locks are swept once the table grows past this many entries.
const SWEEP_THRESHOLD: usize = 1024;

/// One exclusive lock per prescription id, created on demand.
#[derive(Clone, Default)]
pub struct PrescriptionLocks {
  table: Arc<Mutex<HashMap<Uuid, Arc<TokioMutex<()>>>>>,
}

impl PrescriptionLocks {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `prescription_id`. Released on drop.
  pub async fn acquire(&self, prescription_id: Uuid) -> OwnedMutexGuard<()> {
    let lock = {
      let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
      if table.len() >= SWEEP_THRESHOLD {
        // Only the table holds a reference to an idle lock.
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
      }
      table
        .entry(prescription_id)
        .or_insert_with(|| Arc::new(TokioMutex::new(())))
        .clone()
    };
    lock.lock_owned().await
  }

  /// Number of locks currently tracked.
  pub fn len(&self) -> usize {
    self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn same_prescription_is_exclusive() {
    let locks = PrescriptionLocks::new();
    let id = Uuid::new_v4();

    let guard = locks.acquire(id).await;
    let contender = locks.clone();
    let waiting = tokio::spawn(async move { contender.acquire(id).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());

    drop(guard);
    tokio::time::timeout(Duration::from_secs(1), waiting)
      .await
      .expect("lock released")
      .unwrap();
  }

  #[tokio::test]
  async fn different_prescriptions_do_not_contend() {
    let locks = PrescriptionLocks::new();
    let _a = locks.acquire(Uuid::new_v4()).await;
    let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
    assert!(b.is_ok());
    assert_eq!(locks.len(), 2);
  }
}
