//! Core of calbridge: scripted access to the macOS Calendar app.
//!
//! - `identity` and `scope` turn a caller's event id and scope token into
//!   a concrete mutation target
//! - `backend` reads through the Calendar store and falls back to the app;
//!   writes always go through the app (`automation`)
//! - `supervisor` bounds every backend call with a deadline and cancellation
//! - `journal` records mutations for undo, redo and batches

pub mod automation;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod identity;
pub mod journal;
pub mod recurrence;
pub mod scope;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use backend::{BackendFactory, CalendarBackend, DoctorReport, default_factory};
pub use client::CalendarClient;
pub use config::BridgeConfig;
pub use error::{CalBridgeError, CalBridgeResult};
pub use event::*;
pub use scope::{MutationScope, RecurrenceScope};
