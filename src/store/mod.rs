//! Transfer record store.
//!
//! The store is the single source of truth for saga state. Every mutation
//! is a conditional transition: the caller names the version it read, and the
//! write is rejected with [`StoreError::VersionConflict`] if another driver
//! has written since. Illegal state-machine edges are rejected with
//! [`StoreError::IllegalTransition`].
//!
//! - `memory`: process-local store for tests and local runs
//! - `postgres`: durable store backed by the `transfers` table

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::transfer::{NewTransfer, Transfer, TransferStatus, TransferUpdate};

pub use memory::InMemoryTransferStore;
pub use postgres::PostgresTransferStore;

/// Errors raised by transfer store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another record already holds this idempotency key.
    #[error("Idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Transfer reference already exists: {0}")]
    DuplicateReference(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    /// The record moved on since it was read.
    #[error("Version conflict on {reference}: expected {expected}, found {actual}")]
    VersionConflict {
        reference: String,
        expected: i64,
        actual: i64,
    },

    #[error("Illegal transition on {reference}: {from} -> {to}")]
    IllegalTransition {
        reference: String,
        from: TransferStatus,
        to: TransferStatus,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence operations for transfer records.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record in `PENDING`.
    ///
    /// Fails with `DuplicateIdempotencyKey` if the key is already taken.
    async fn insert(&self, transfer: NewTransfer) -> Result<Transfer>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>>;

    /// Transfers where the account is source or destination, newest first.
    async fn find_by_account(&self, account_number: &str, limit: i64) -> Result<Vec<Transfer>>;

    /// Apply `update` if the stored version still equals `expected_version`
    /// and the state machine allows the edge. Returns the written record.
    async fn transition(
        &self,
        reference: &str,
        expected_version: i64,
        update: TransferUpdate,
    ) -> Result<Transfer>;

    /// Non-terminal transfers last written at or before `updated_before`,
    /// stalest first.
    async fn find_stuck(&self, updated_before: DateTime<Utc>, limit: i64) -> Result<Vec<Transfer>>;

    /// Connectivity check for health reporting.
    async fn ping(&self) -> Result<()>;
}

/// Validate a transition against the record it would replace.
pub(crate) fn check_transition(
    current: &Transfer,
    expected_version: i64,
    update: &TransferUpdate,
) -> Result<()> {
    if current.version != expected_version {
        return Err(StoreError::VersionConflict {
            reference: current.transfer_reference.clone(),
            expected: expected_version,
            actual: current.version,
        });
    }
    if !current.status.can_transition_to(update.status) {
        return Err(StoreError::IllegalTransition {
            reference: current.transfer_reference.clone(),
            from: current.status,
            to: update.status,
        });
    }
    Ok(())
}
