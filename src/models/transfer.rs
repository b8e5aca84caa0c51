//! Transfer data models and API request/response types.
//!
//! This module defines:
//! - `Transfer`: Database entity holding the saga state of one transfer
//! - `TransferStatus`: The saga state machine and its allowed edges
//! - `NewTransfer` / `TransferUpdate`: Inputs to the transfer store
//! - `SubmitTransferRequest` / `TransferResponse`: Inbound API bodies

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Saga state of a transfer.
///
/// ```text
/// PENDING -> VALIDATING -> DEBIT_PENDING -> DEBIT_COMPLETED -> CREDIT_PENDING -> COMPLETED
///               |               |                                   |
///               v               v                                   v
///             FAILED          FAILED                          COMPENSATING -> COMPENSATED
/// ```
///
/// `COMPLETED`, `FAILED` and `COMPENSATED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Validating,
    DebitPending,
    DebitCompleted,
    CreditPending,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl TransferStatus {
    /// Every state a driver may still have to act on.
    pub const NON_TERMINAL: [TransferStatus; 6] = [
        TransferStatus::Pending,
        TransferStatus::Validating,
        TransferStatus::DebitPending,
        TransferStatus::DebitCompleted,
        TransferStatus::CreditPending,
        TransferStatus::Compensating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Validating => "VALIDATING",
            TransferStatus::DebitPending => "DEBIT_PENDING",
            TransferStatus::DebitCompleted => "DEBIT_COMPLETED",
            TransferStatus::CreditPending => "CREDIT_PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Compensating => "COMPENSATING",
            TransferStatus::Compensated => "COMPENSATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Compensated
        )
    }

    /// Whether the saga may move from `self` to `next`.
    ///
    /// `COMPENSATING -> COMPENSATING` is the only self-edge; it records a
    /// failed reversal attempt without leaving the compensation path.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;

        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, DebitPending)
                | (Validating, Failed)
                | (DebitPending, DebitCompleted)
                | (DebitPending, Failed)
                | (DebitCompleted, CreditPending)
                | (CreditPending, Completed)
                | (CreditPending, Compensating)
                | (Compensating, Compensating)
                | (Compensating, Compensated)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let status = match value {
            "PENDING" => TransferStatus::Pending,
            "VALIDATING" => TransferStatus::Validating,
            "DEBIT_PENDING" => TransferStatus::DebitPending,
            "DEBIT_COMPLETED" => TransferStatus::DebitCompleted,
            "CREDIT_PENDING" => TransferStatus::CreditPending,
            "COMPLETED" => TransferStatus::Completed,
            "FAILED" => TransferStatus::Failed,
            "COMPENSATING" => TransferStatus::Compensating,
            "COMPENSATED" => TransferStatus::Compensated,
            other => {
                return Err(UnknownVariant {
                    kind: "transfer status",
                    value: other.to_string(),
                });
            }
        };
        Ok(status)
    }
}

impl TryFrom<String> for TransferStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of transfer requested by the caller. Informational only; the saga
/// treats both kinds identically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    #[default]
    Internal,
    External,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Internal => "INTERNAL",
            TransferType::External => "EXTERNAL",
        }
    }
}

impl TryFrom<String> for TransferType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "INTERNAL" => Ok(TransferType::Internal),
            "EXTERNAL" => Ok(TransferType::External),
            _ => Err(UnknownVariant {
                kind: "transfer type",
                value,
            }),
        }
    }
}

/// Reasons recorded in `failure_reason`.
pub mod failure_reason {
    pub const ACCOUNT_INVALID: &str = "ACCOUNT_INVALID";
    pub const CURRENCY_MISMATCH: &str = "CURRENCY_MISMATCH";
    pub const LEDGER_UNAVAILABLE: &str = "LEDGER_UNAVAILABLE";
    pub const DEBIT_UNCONFIRMED: &str = "DEBIT_UNCONFIRMED";
    pub const CREDIT_UNCONFIRMED: &str = "CREDIT_UNCONFIRMED";
}

/// Represents a transfer record from the database.
///
/// # Database Table
///
/// Maps to the `transfers` table. Each transfer:
/// - Is identified by a generated `transfer_reference`
/// - Has at most one record per `idempotency_key`
/// - Carries a `version` that every write must match (optimistic concurrency)
/// - Is never deleted; terminal rows are the audit trail
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Transfer {
    /// Globally unique reference, also the idempotency token sent to the ledger
    pub transfer_reference: String,

    /// Caller-supplied deduplication key
    pub idempotency_key: Option<String>,

    pub from_account_number: String,
    pub to_account_number: String,

    /// Fixed-point amount, always positive
    pub amount: Decimal,

    /// Currency code (ISO 4217)
    pub currency: String,

    pub description: Option<String>,

    #[sqlx(try_from = "String")]
    pub transfer_type: TransferType,

    #[sqlx(try_from = "String")]
    pub status: TransferStatus,

    /// Why the transfer failed or had to be compensated
    pub failure_reason: Option<String>,

    /// Reversal attempts made while compensating
    pub compensation_attempts: i32,

    pub initiated_at: DateTime<Utc>,

    /// Set once the record reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Incremented on every write
    pub version: i64,
}

impl Transfer {
    /// Reference used for the reversing credit. Deterministic, so repeated
    /// compensation attempts collapse to one posting on the ledger side.
    pub fn compensation_reference(&self) -> String {
        format!("{}:comp", self.transfer_reference)
    }

    /// Build the record that `update` produces from `self`.
    ///
    /// Stores use this to keep write semantics identical across backends.
    pub fn apply(&self, update: &TransferUpdate, now: DateTime<Utc>) -> Transfer {
        let mut next = self.clone();
        next.status = update.status;
        if let Some(reason) = &update.failure_reason {
            next.failure_reason = Some(reason.clone());
        }
        if let Some(attempts) = update.compensation_attempts {
            next.compensation_attempts = attempts;
        }
        if update.status.is_terminal() {
            next.completed_at = Some(now);
        }
        next.updated_at = now;
        next.version += 1;
        next
    }
}

/// Generate a fresh transfer reference.
pub fn generate_reference() -> String {
    format!("TRF-{}", Uuid::new_v4().simple())
}

/// A validated transfer ready to be inserted in `PENDING`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub transfer_reference: String,
    pub idempotency_key: Option<String>,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub transfer_type: TransferType,
}

impl NewTransfer {
    /// The initial record for this transfer.
    pub fn into_pending(self, now: DateTime<Utc>) -> Transfer {
        Transfer {
            transfer_reference: self.transfer_reference,
            idempotency_key: self.idempotency_key,
            from_account_number: self.from_account_number,
            to_account_number: self.to_account_number,
            amount: self.amount,
            currency: self.currency,
            description: self.description,
            transfer_type: self.transfer_type,
            status: TransferStatus::Pending,
            failure_reason: None,
            compensation_attempts: 0,
            initiated_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Whether an existing record was created from the same payload.
    pub fn matches(&self, existing: &Transfer) -> bool {
        self.from_account_number == existing.from_account_number
            && self.to_account_number == existing.to_account_number
            && self.amount == existing.amount
            && self.currency == existing.currency
    }
}

/// A conditional write against a transfer record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferUpdate {
    pub status: TransferStatus,
    /// Replaces the stored reason when set; otherwise the reason is kept
    pub failure_reason: Option<String>,
    pub compensation_attempts: Option<i32>,
}

impl TransferUpdate {
    pub fn to(status: TransferStatus) -> Self {
        Self {
            status,
            failure_reason: None,
            compensation_attempts: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_compensation_attempts(mut self, attempts: i32) -> Self {
        self.compensation_attempts = Some(attempts);
        self
    }
}

/// Request to submit a transfer.
///
/// # JSON Example
///
/// ```json
/// {
///   "idempotency_key": "invoice-789",
///   "from_account_number": "ACC-1001",
///   "to_account_number": "ACC-2002",
///   "amount": "100.00",
///   "currency": "USD",
///   "transfer_type": "INTERNAL",
///   "description": "Payment for services"
/// }
/// ```
///
/// The idempotency key may also be sent as an `Idempotency-Key` header.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTransferRequest {
    pub idempotency_key: Option<String>,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub transfer_type: TransferType,
    pub description: Option<String>,
}

/// Response returned for transfer operations.
///
/// # JSON Example
///
/// ```json
/// {
///   "transfer_reference": "TRF-9b2f0c0e5d7a4c4f9a51c2d1f6a0e3b7",
///   "status": "PENDING",
///   "from_account_number": "ACC-1001",
///   "to_account_number": "ACC-2002",
///   "amount": "100.00",
///   "currency": "USD",
///   "transfer_type": "INTERNAL",
///   "description": "Payment for services",
///   "failure_reason": null,
///   "initiated_at": "2025-12-21T16:00:00Z",
///   "completed_at": null,
///   "updated_at": "2025-12-21T16:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub transfer_reference: String,
    pub status: TransferStatus,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub transfer_type: TransferType,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Convert database Transfer to API TransferResponse.
///
/// Drops the idempotency key and the concurrency bookkeeping
/// (version, compensation attempts).
impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            transfer_reference: transfer.transfer_reference,
            status: transfer.status,
            from_account_number: transfer.from_account_number,
            to_account_number: transfer.to_account_number,
            amount: transfer.amount,
            currency: transfer.currency,
            transfer_type: transfer.transfer_type,
            description: transfer.description,
            failure_reason: transfer.failure_reason,
            initiated_at: transfer.initiated_at,
            completed_at: transfer.completed_at,
            updated_at: transfer.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Transfer {
        NewTransfer {
            transfer_reference: "TRF-1".to_string(),
            idempotency_key: Some("K1".to_string()),
            from_account_number: "A".to_string(),
            to_account_number: "B".to_string(),
            amount: dec!(100.00),
            currency: "USD".to_string(),
            description: None,
            transfer_type: TransferType::Internal,
        }
        .into_pending(Utc::now())
    }

    #[test]
    fn test_happy_path_edges_are_allowed() {
        use TransferStatus::*;
        let path = [
            Pending,
            Validating,
            DebitPending,
            DebitCompleted,
            CreditPending,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [
            TransferStatus::Completed,
            TransferStatus::Failed,
            TransferStatus::Compensated,
        ] {
            assert!(terminal.is_terminal());
            for next in TransferStatus::NON_TERMINAL {
                assert!(!terminal.can_transition_to(next));
            }
            assert!(!terminal.can_transition_to(TransferStatus::Failed));
        }
    }

    #[test]
    fn test_skipped_and_reversed_edges_are_rejected() {
        use TransferStatus::*;
        assert!(!Pending.can_transition_to(DebitPending));
        assert!(!Validating.can_transition_to(CreditPending));
        assert!(!DebitCompleted.can_transition_to(Validating));
        assert!(!DebitCompleted.can_transition_to(Failed));
        assert!(!CreditPending.can_transition_to(Failed));
        assert!(!DebitPending.can_transition_to(Compensating));
        assert!(Compensating.can_transition_to(Compensating));
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in TransferStatus::NON_TERMINAL {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
        assert!("SETTLED".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_apply_bumps_version_and_stamps_completion() {
        let transfer = sample();
        let now = Utc::now();

        let failed = transfer.apply(
            &TransferUpdate::to(TransferStatus::Failed).with_reason("ACCOUNT_INVALID"),
            now,
        );
        assert_eq!(failed.version, 1);
        assert_eq!(failed.completed_at, Some(now));
        assert_eq!(failed.failure_reason.as_deref(), Some("ACCOUNT_INVALID"));

        let validating = transfer.apply(&TransferUpdate::to(TransferStatus::Validating), now);
        assert_eq!(validating.completed_at, None);
        assert_eq!(validating.failure_reason, None);
    }

    #[test]
    fn test_compensation_reference_is_derived() {
        assert_eq!(sample().compensation_reference(), "TRF-1:comp");
    }
}
