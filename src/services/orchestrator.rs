//! Saga orchestrator.
//!
//! Drives one transfer through validate, debit and credit, persisting each
//! step before acting on it. Every step is resumable from the stored status
//! alone, which is what lets the recovery scanner pick up where a crashed or
//! timed-out driver stopped:
//!
//! | status            | next action                                   |
//! |-------------------|-----------------------------------------------|
//! | `PENDING`         | claim for validation                          |
//! | `VALIDATING`      | look up both accounts                         |
//! | `DEBIT_PENDING`   | (re-)issue the debit                          |
//! | `DEBIT_COMPLETED` | claim for credit                              |
//! | `CREDIT_PENDING`  | (re-)issue the credit                         |
//! | `COMPENSATING`    | hand over to the compensation coordinator     |
//!
//! Re-issuing a posting is safe because the ledger deduplicates by the
//! transfer reference.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ledger::LedgerClient;
use crate::models::ledger::{AccountLookup, AccountStatus, LedgerOutcome};
use crate::models::transfer::{Transfer, TransferStatus, TransferUpdate, failure_reason};
use crate::services::compensation::CompensationCoordinator;
use crate::services::event_publisher::EventPublisher;
use crate::services::transitions::{Advance, SagaError, advance};
use crate::store::TransferStore;

pub struct SagaOrchestrator {
    store: Arc<dyn TransferStore>,
    ledger: Arc<LedgerClient>,
    compensation: CompensationCoordinator,
    publisher: EventPublisher,
    deadline: Option<Duration>,
}

impl SagaOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        ledger: Arc<LedgerClient>,
        compensation: CompensationCoordinator,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            ledger,
            compensation,
            publisher,
            deadline: None,
        }
    }

    /// Bound every drive of a transfer to `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Load the transfer and drive it as far as it will go.
    pub async fn run(&self, reference: &str) -> Result<Transfer, SagaError> {
        let transfer = self.load(reference).await?;
        self.resume(transfer).await
    }

    /// Like [`run`](Self::run) but gives up after `deadline`.
    ///
    /// On expiry the in-flight step is abandoned and the record is returned
    /// as stored, still non-terminal, for the recovery scanner to finish.
    pub async fn run_with_deadline(
        &self,
        reference: &str,
        deadline: Duration,
    ) -> Result<Transfer, SagaError> {
        let transfer = self.load(reference).await?;
        self.drive_with_deadline(transfer, deadline).await
    }

    /// Continue from the state carried by `transfer`.
    pub async fn resume(&self, transfer: Transfer) -> Result<Transfer, SagaError> {
        match self.deadline {
            Some(deadline) => self.drive_with_deadline(transfer, deadline).await,
            None => self.drive(transfer).await,
        }
    }

    async fn drive_with_deadline(
        &self,
        transfer: Transfer,
        deadline: Duration,
    ) -> Result<Transfer, SagaError> {
        let reference = transfer.transfer_reference.clone();

        match tokio::time::timeout(deadline, self.drive(transfer)).await {
            Ok(result) => result,
            Err(_) => {
                let current = self.load(&reference).await?;
                warn!(
                    transfer_reference = %reference,
                    status = %current.status,
                    deadline = ?deadline,
                    "Saga deadline exceeded; leaving transfer for recovery"
                );
                Ok(current)
            }
        }
    }

    async fn drive(&self, mut transfer: Transfer) -> Result<Transfer, SagaError> {
        loop {
            let update = match transfer.status {
                TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Compensated => {
                    return Ok(transfer);
                }
                TransferStatus::Compensating => return self.compensation.compensate(transfer).await,
                TransferStatus::Pending => TransferUpdate::to(TransferStatus::Validating),
                TransferStatus::Validating => self.validate(&transfer).await,
                TransferStatus::DebitPending => self.debit(&transfer).await,
                TransferStatus::DebitCompleted => TransferUpdate::to(TransferStatus::CreditPending),
                TransferStatus::CreditPending => self.credit(&transfer).await,
            };

            transfer = match advance(&*self.store, &self.publisher, &transfer, update).await? {
                Advance::Written(next) => next,
                Advance::Superseded(current) => return Ok(current),
            };
        }
    }

    async fn validate(&self, transfer: &Transfer) -> TransferUpdate {
        let (source, destination) = tokio::join!(
            self.ledger.get_account(&transfer.from_account_number),
            self.ledger.get_account(&transfer.to_account_number),
        );
        validation_outcome(transfer, &source, &destination)
    }

    async fn debit(&self, transfer: &Transfer) -> TransferUpdate {
        let outcome = self
            .ledger
            .debit(
                &transfer.from_account_number,
                transfer.amount,
                &transfer.currency,
                &transfer.transfer_reference,
            )
            .await;

        match outcome {
            LedgerOutcome::Success { balance_after } => {
                debug!(
                    transfer_reference = %transfer.transfer_reference,
                    %balance_after,
                    "Source account debited"
                );
                TransferUpdate::to(TransferStatus::DebitCompleted)
            }
            LedgerOutcome::Rejected(reason) => {
                TransferUpdate::to(TransferStatus::Failed).with_reason(reason.code())
            }
            LedgerOutcome::Indeterminate(detail) => {
                warn!(
                    transfer_reference = %transfer.transfer_reference,
                    error = %detail,
                    "Debit could not be confirmed"
                );
                TransferUpdate::to(TransferStatus::Failed)
                    .with_reason(failure_reason::DEBIT_UNCONFIRMED)
            }
        }
    }

    async fn credit(&self, transfer: &Transfer) -> TransferUpdate {
        let outcome = self
            .ledger
            .credit(
                &transfer.to_account_number,
                transfer.amount,
                &transfer.currency,
                &transfer.transfer_reference,
            )
            .await;

        match outcome {
            LedgerOutcome::Success { balance_after } => {
                debug!(
                    transfer_reference = %transfer.transfer_reference,
                    %balance_after,
                    "Destination account credited"
                );
                TransferUpdate::to(TransferStatus::Completed)
            }
            LedgerOutcome::Rejected(reason) => {
                info!(
                    transfer_reference = %transfer.transfer_reference,
                    %reason,
                    "Credit rejected; compensating debit"
                );
                TransferUpdate::to(TransferStatus::Compensating).with_reason(reason.code())
            }
            LedgerOutcome::Indeterminate(detail) => {
                warn!(
                    transfer_reference = %transfer.transfer_reference,
                    error = %detail,
                    "Credit could not be confirmed; compensating debit"
                );
                TransferUpdate::to(TransferStatus::Compensating)
                    .with_reason(failure_reason::CREDIT_UNCONFIRMED)
            }
        }
    }

    async fn load(&self, reference: &str) -> Result<Transfer, SagaError> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| SagaError::NotFound(reference.to_string()))
    }
}

/// Decide the validation step from both account lookups.
///
/// An unreachable ledger fails the transfer before any funds move; a missing
/// or inactive account beats a currency mismatch.
fn validation_outcome(
    transfer: &Transfer,
    source: &AccountLookup,
    destination: &AccountLookup,
) -> TransferUpdate {
    let failed = |reason: &str| TransferUpdate::to(TransferStatus::Failed).with_reason(reason);

    let (source, destination) = match (source, destination) {
        (AccountLookup::Indeterminate(_), _) | (_, AccountLookup::Indeterminate(_)) => {
            return failed(failure_reason::LEDGER_UNAVAILABLE);
        }
        (AccountLookup::Found(source), AccountLookup::Found(destination)) => (source, destination),
        _ => return failed(failure_reason::ACCOUNT_INVALID),
    };

    if source.status != AccountStatus::Active || destination.status != AccountStatus::Active {
        return failed(failure_reason::ACCOUNT_INVALID);
    }
    if source.currency != transfer.currency || destination.currency != transfer.currency {
        return failed(failure_reason::CURRENCY_MISMATCH);
    }

    TransferUpdate::to(TransferStatus::DebitPending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ledger::LedgerAccount;
    use crate::models::transfer::{NewTransfer, TransferType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn transfer() -> Transfer {
        NewTransfer {
            transfer_reference: "TRF-1".to_string(),
            idempotency_key: None,
            from_account_number: "A".to_string(),
            to_account_number: "B".to_string(),
            amount: dec!(10.00),
            currency: "USD".to_string(),
            description: None,
            transfer_type: TransferType::Internal,
        }
        .into_pending(Utc::now())
    }

    fn account(number: &str, status: AccountStatus, currency: &str) -> AccountLookup {
        AccountLookup::Found(LedgerAccount {
            account_number: number.to_string(),
            status,
            currency: currency.to_string(),
        })
    }

    fn reason(update: &TransferUpdate) -> Option<&str> {
        update.failure_reason.as_deref()
    }

    #[test]
    fn test_valid_accounts_proceed_to_debit() {
        let update = validation_outcome(
            &transfer(),
            &account("A", AccountStatus::Active, "USD"),
            &account("B", AccountStatus::Active, "USD"),
        );
        assert_eq!(update, TransferUpdate::to(TransferStatus::DebitPending));
    }

    #[test]
    fn test_missing_or_inactive_account_is_invalid() {
        let missing = validation_outcome(
            &transfer(),
            &account("A", AccountStatus::Active, "USD"),
            &AccountLookup::NotFound,
        );
        assert_eq!(missing.status, TransferStatus::Failed);
        assert_eq!(reason(&missing), Some(failure_reason::ACCOUNT_INVALID));

        let frozen = validation_outcome(
            &transfer(),
            &account("A", AccountStatus::Frozen, "USD"),
            &account("B", AccountStatus::Active, "USD"),
        );
        assert_eq!(reason(&frozen), Some(failure_reason::ACCOUNT_INVALID));
    }

    #[test]
    fn test_currency_mismatch() {
        let update = validation_outcome(
            &transfer(),
            &account("A", AccountStatus::Active, "USD"),
            &account("B", AccountStatus::Active, "EUR"),
        );
        assert_eq!(update.status, TransferStatus::Failed);
        assert_eq!(reason(&update), Some(failure_reason::CURRENCY_MISMATCH));
    }

    #[test]
    fn test_unreachable_ledger_fails_before_funds_move() {
        let update = validation_outcome(
            &transfer(),
            &AccountLookup::Indeterminate("DEPENDENCY_UNAVAILABLE".to_string()),
            &AccountLookup::NotFound,
        );
        assert_eq!(update.status, TransferStatus::Failed);
        assert_eq!(reason(&update), Some(failure_reason::LEDGER_UNAVAILABLE));
    }
}
