//! Compensation coordinator.
//!
//! Reverses a completed debit by crediting the source account under the
//! derived `<reference>:comp` posting reference. The ledger deduplicates on
//! that reference, so any number of attempts move funds back at most once.
//!
//! Reversal is retried with backoff inside one invocation up to
//! `max_attempts_per_run`; after that the record stays `COMPENSATING` and the
//! recovery scanner picks it up again on its next pass.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, info, warn};

use crate::ledger::LedgerClient;
use crate::models::ledger::LedgerOutcome;
use crate::models::transfer::{Transfer, TransferStatus, TransferUpdate};
use crate::services::event_publisher::EventPublisher;
use crate::services::transitions::{Advance, SagaError, advance};
use crate::store::TransferStore;

/// Attempt and alerting limits for reversals.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationPolicy {
    /// Reversal attempts per invocation
    pub max_attempts_per_run: usize,
    /// Emit an alert every this many cumulative failed attempts
    pub alert_after_attempts: i32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl CompensationPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts_per_run.saturating_sub(1))
            .with_jitter()
    }

    fn should_alert(&self, attempts: i32) -> bool {
        let every = self.alert_after_attempts.max(1);
        attempts >= every && attempts % every == 0
    }
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_run: 5,
            alert_after_attempts: 10,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

pub struct CompensationCoordinator {
    store: Arc<dyn TransferStore>,
    ledger: Arc<LedgerClient>,
    publisher: EventPublisher,
    policy: CompensationPolicy,
}

impl CompensationCoordinator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        ledger: Arc<LedgerClient>,
        publisher: EventPublisher,
        policy: CompensationPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            publisher,
            policy,
        }
    }

    /// Drive a `COMPENSATING` transfer towards `COMPENSATED`.
    ///
    /// Returns the latest record: `COMPENSATED` on success, still
    /// `COMPENSATING` once this run's attempts are spent, or whatever another
    /// driver wrote if it got there first.
    pub async fn compensate(&self, transfer: Transfer) -> Result<Transfer, SagaError> {
        if transfer.status != TransferStatus::Compensating {
            return Ok(transfer);
        }

        let mut transfer = transfer;
        let mut delays = self.policy.backoff().build();

        loop {
            let reference = transfer.compensation_reference();
            let outcome = self
                .ledger
                .credit(
                    &transfer.from_account_number,
                    transfer.amount,
                    &transfer.currency,
                    &reference,
                )
                .await;

            let failure = match outcome {
                LedgerOutcome::Success { balance_after } => {
                    info!(
                        transfer_reference = %transfer.transfer_reference,
                        account = %transfer.from_account_number,
                        %balance_after,
                        "Debit reversed"
                    );
                    let update = TransferUpdate::to(TransferStatus::Compensated);
                    return match advance(&*self.store, &self.publisher, &transfer, update).await? {
                        Advance::Written(next) | Advance::Superseded(next) => Ok(next),
                    };
                }
                LedgerOutcome::Rejected(reason) => reason.to_string(),
                LedgerOutcome::Indeterminate(detail) => detail,
            };

            let attempts = transfer.compensation_attempts.saturating_add(1);
            let update = TransferUpdate::to(TransferStatus::Compensating)
                .with_compensation_attempts(attempts);
            transfer = match advance(&*self.store, &self.publisher, &transfer, update).await? {
                Advance::Written(next) => next,
                Advance::Superseded(current) => return Ok(current),
            };

            if self.policy.should_alert(attempts) {
                error!(
                    alert = "compensation_stuck",
                    transfer_reference = %transfer.transfer_reference,
                    attempt = attempts,
                    error = %failure,
                    "Debit reversal keeps failing; manual attention required"
                );
            } else {
                warn!(
                    transfer_reference = %transfer.transfer_reference,
                    attempt = attempts,
                    error = %failure,
                    "Debit reversal failed"
                );
            }

            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    warn!(
                        transfer_reference = %transfer.transfer_reference,
                        attempt = attempts,
                        "Reversal attempts for this run spent; deferring to recovery"
                    );
                    return Ok(transfer);
                }
            }
        }
    }
}
