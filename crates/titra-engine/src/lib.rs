//! The recurring-fulfillment engine.
//!
//! [`RecurringFulfillmentProcessor`] turns billing events into dispensations
//! exactly once per event, and drives prescription and subscription
//! lifecycles for provider actions. All writes for one prescription are
//! serialised through a prescription-scoped lock; across processes, the
//! store's compare-and-set guards and the ledger's uniqueness constraint
//! decide.

pub mod config;
pub mod locks;
pub mod processor;
pub mod treatment;

use titra_core::{
  collaborator::{CatalogResolver, FulfillmentClient, Notifier},
  store::TreatmentStore,
};

pub use config::EngineConfig;
pub use processor::{FulfillmentOutcome, RecurringFulfillmentProcessor};

/// The concrete store and collaborators an engine runs against.
///
/// Implemented by a marker type in each deployment (and in tests), so the
/// engine and the HTTP layer carry one type parameter instead of four.
pub trait Backend: Send + Sync + 'static {
  type Store: TreatmentStore + 'static;
  type Catalog: CatalogResolver + 'static;
  type Orders: FulfillmentClient + 'static;
  type Notifier: Notifier + 'static;
}
