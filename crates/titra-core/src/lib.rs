//! Core types and trait definitions for the Titra fulfillment engine.
//!
//! This crate is deliberately free of HTTP, database, and runtime
//! dependencies. The dose calculator and both lifecycle state machines are
//! pure; persistence and external collaborators are expressed as traits.

pub mod collaborator;
pub mod error;
pub mod event;
pub mod ledger;
pub mod prescription;
pub mod progression;
pub mod schedule;
pub mod store;
pub mod subscription;

pub use error::{Error, Result};
