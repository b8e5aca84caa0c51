//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! The saga drivers (orchestrator, compensation, recovery) share one
//! versioned write path in `transitions`.

pub mod compensation;
pub mod event_publisher;
pub mod idempotency;
pub mod orchestrator;
pub mod recovery;
pub mod transfer_service;
pub mod transitions;
pub mod webhook_service;
