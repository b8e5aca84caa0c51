//! Transfer saga orchestrator.
//!
//! Moves funds between two accounts held by an external ledger as a saga:
//! validate, debit source, credit destination, and reverse the debit when the
//! credit cannot be applied. Each step is persisted before it runs, so a
//! crashed or timed-out transfer can be resumed by the recovery scanner.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod resilience;
pub mod services;
pub mod store;
