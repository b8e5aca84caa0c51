//! Ledger service data models.
//!
//! The ledger owns account balances; this service only reads account
//! metadata and posts single-account debits and credits against it.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account status as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
    Frozen,
    Closed,
}

/// Account metadata returned by the ledger's read path.
///
/// # JSON Example
///
/// ```json
/// {
///   "account_number": "ACC-1001",
///   "status": "ACTIVE",
///   "currency": "USD"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub account_number: String,
    pub status: AccountStatus,
    pub currency: String,
}

/// Which side of a transfer a posting applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostingKind {
    Debit,
    Credit,
}

impl PostingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingKind::Debit => "debit",
            PostingKind::Credit => "credit",
        }
    }
}

impl fmt::Display for PostingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a debit or credit call.
///
/// `reference` is the ledger-side idempotency token: a repeated posting with
/// the same reference returns the original result without moving funds again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRequest {
    #[serde(skip)]
    pub account_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
}

/// Successful posting response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub balance_after: Decimal,
}

/// Definitive business rejection from the ledger. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    InsufficientFunds,
    AccountNotActive,
    AccountNotFound,
    Other(String),
}

impl RejectionReason {
    pub fn from_code(code: &str) -> Self {
        match code {
            "INSUFFICIENT_FUNDS" => RejectionReason::InsufficientFunds,
            "ACCOUNT_NOT_ACTIVE" => RejectionReason::AccountNotActive,
            "ACCOUNT_NOT_FOUND" => RejectionReason::AccountNotFound,
            other => RejectionReason::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            RejectionReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            RejectionReason::AccountNotActive => "ACCOUNT_NOT_ACTIVE",
            RejectionReason::AccountNotFound => "ACCOUNT_NOT_FOUND",
            RejectionReason::Other(code) => code,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of a posting after timeout, retry and circuit breaking are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Success { balance_after: Decimal },
    /// Definitive; the posting was not applied
    Rejected(RejectionReason),
    /// Could not be confirmed either way; retries were exhausted or the
    /// breaker was open
    Indeterminate(String),
}

/// Result of an account lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountLookup {
    Found(LedgerAccount),
    NotFound,
    Indeterminate(String),
}
