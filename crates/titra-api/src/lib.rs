//! JSON REST API for Titra.
//!
//! Exposes an axum [`Router`] backed by a
//! [`titra_engine::RecurringFulfillmentProcessor`]. Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", titra_api::api_router(engine.clone()))
//! ```

pub mod billing_events;
pub mod error;
pub mod prescriptions;
pub mod subscriptions;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use titra_engine::{Backend, RecurringFulfillmentProcessor};

pub use error::ApiError;

/// Shared handler state.
pub type Engine<B> = Arc<RecurringFulfillmentProcessor<B>>;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<B: Backend>(engine: Engine<B>) -> Router<()> {
  Router::new()
    // Billing source
    .route("/billing-events", post(billing_events::receive::<B>))
    // Prescriptions
    .route(
      "/prescriptions",
      get(prescriptions::list::<B>).post(prescriptions::create::<B>),
    )
    .route("/prescriptions/{id}", get(prescriptions::get_one::<B>))
    .route(
      "/prescriptions/{id}/payment-authorized",
      post(prescriptions::payment_authorized::<B>),
    )
    .route("/prescriptions/{id}/signature", post(prescriptions::signature::<B>))
    .route("/prescriptions/{id}/cancel", post(prescriptions::cancel::<B>))
    .route("/prescriptions/{id}/replace", post(prescriptions::replace::<B>))
    .route("/prescriptions/{id}/dose", get(prescriptions::dose::<B>))
    .route("/prescriptions/{id}/fulfillments", get(prescriptions::fulfillments::<B>))
    // Subscriptions
    .route("/prescriptions/{id}/subscription", get(subscriptions::get_one::<B>))
    .route("/prescriptions/{id}/subscription/pause", post(subscriptions::pause::<B>))
    .route("/prescriptions/{id}/subscription/resume", post(subscriptions::resume::<B>))
    .with_state(engine)
}

#[cfg(test)]
mod tests;
