//! Ledger service integration.
//!
//! `LedgerApi` is the raw remote contract (one attempt, no policy). The
//! [`LedgerClient`] wraps any implementation with timeout, retry and
//! circuit breaking and folds the result into a closed set of outcomes.
//!
//! - `http`: JSON-over-HTTP adapter for the real ledger service
//! - `sandbox`: in-process ledger honouring the same contract
//! - `client`: the resilient wrapper the saga talks to

pub mod client;
pub mod http;
pub mod sandbox;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::ledger::{LedgerAccount, LedgerReceipt, PostingRequest, RejectionReason};

pub use client::{LEDGER_DEPENDENCY, LedgerClient, LedgerClientPolicy};
pub use http::HttpLedgerApi;
pub use sandbox::SandboxLedger;

/// Errors from a single ledger call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Definitive business rejection; the posting was not applied.
    #[error("rejected by ledger: {0}")]
    Rejected(RejectionReason),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger returned HTTP {status}")]
    Server { status: u16 },

    /// The response could not be read; the posting may have been applied.
    #[error("unreadable ledger response: {0}")]
    Decode(String),

    /// The circuit breaker refused the call.
    #[error("DEPENDENCY_UNAVAILABLE")]
    DependencyUnavailable,
}

impl LedgerError {
    /// Whether re-issuing the same call may succeed. Safe for postings
    /// because the ledger deduplicates by reference.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout(_)
                | LedgerError::Transport(_)
                | LedgerError::Server { .. }
                | LedgerError::Decode(_)
        )
    }

    /// Whether the error reflects on the dependency's health.
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }
}

/// Raw ledger contract.
///
/// Postings are idempotent by `reference`: repeating an identical call
/// returns the original result without applying the mutation twice.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn debit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError>;

    async fn credit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError>;

    /// `Ok(None)` when the account does not exist.
    async fn get_account(&self, account_number: &str) -> Result<Option<LedgerAccount>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_and_open_breaker_are_not_retried() {
        assert!(!LedgerError::Rejected(RejectionReason::InsufficientFunds).is_retryable());
        assert!(!LedgerError::DependencyUnavailable.is_retryable());
        assert!(LedgerError::Server { status: 503 }.is_retryable());
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
