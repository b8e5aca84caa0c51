//! Data models representing database entities and wire payloads.
//!
//! This module contains the transfer record, ledger contract types and
//! lifecycle event payloads.

/// Lifecycle event payloads
pub mod event;
/// Ledger service contract types
pub mod ledger;
/// Transfer saga record model
pub mod transfer;
