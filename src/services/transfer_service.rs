//! Transfer intake and query service.
//!
//! This service handles:
//! - Shape validation of submitted transfers
//! - Idempotent record creation through the [`IdempotencyGuard`]
//! - The `transfer.initiated` event
//! - Handing new transfers to the saga orchestrator
//! - Read access for the HTTP API

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};

use crate::error::AppError;
use crate::models::event::EventTopic;
use crate::models::transfer::{NewTransfer, SubmitTransferRequest, Transfer, generate_reference};
use crate::services::event_publisher::EventPublisher;
use crate::services::idempotency::{IdempotencyGuard, Submission};
use crate::services::orchestrator::SagaOrchestrator;
use crate::store::TransferStore;

/// Page size when the caller does not ask for one.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
/// Largest page a caller may ask for.
pub const MAX_LIST_LIMIT: i64 = 200;

const MAX_AMOUNT_SCALE: u32 = 4;
/// Exclusive upper bound of `NUMERIC(20, 4)`.
const AMOUNT_LIMIT: i64 = 10_000_000_000_000_000;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 500;

pub struct TransferService {
    store: Arc<dyn TransferStore>,
    guard: IdempotencyGuard,
    orchestrator: Arc<SagaOrchestrator>,
    publisher: EventPublisher,
}

impl TransferService {
    pub fn new(
        store: Arc<dyn TransferStore>,
        orchestrator: Arc<SagaOrchestrator>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone()),
            store,
            orchestrator,
            publisher,
        }
    }

    /// Record a transfer in `PENDING` without starting the saga.
    ///
    /// # Process
    ///
    /// 1. Validate the request shape
    /// 2. Return the existing transfer if the idempotency key was seen
    /// 3. Otherwise insert the new record and publish `transfer.initiated`
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: The request failed shape validation
    /// - `Store`: The transfer store failed
    pub async fn submit(&self, request: SubmitTransferRequest) -> Result<Submission, AppError> {
        let transfer = validate_request(request)?;
        let submission = self.guard.create_or_fetch(transfer).await?;

        if submission.replayed {
            info!(
                transfer_reference = %submission.transfer.transfer_reference,
                status = %submission.transfer.status,
                "Replayed idempotent transfer submission"
            );
        } else {
            info!(
                transfer_reference = %submission.transfer.transfer_reference,
                from = %submission.transfer.from_account_number,
                to = %submission.transfer.to_account_number,
                amount = %submission.transfer.amount,
                currency = %submission.transfer.currency,
                "Transfer initiated"
            );
            self.publisher
                .publish(EventTopic::Initiated, &submission.transfer);
        }

        Ok(submission)
    }

    /// Record a transfer and drive its saga on a background task.
    ///
    /// Replays never start a second saga; the original driver or the
    /// recovery scanner owns the transfer.
    pub async fn submit_and_start(
        &self,
        request: SubmitTransferRequest,
    ) -> Result<Submission, AppError> {
        let submission = self.submit(request).await?;

        if !submission.replayed {
            let orchestrator = Arc::clone(&self.orchestrator);
            let reference = submission.transfer.transfer_reference.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(&reference).await {
                    error!(transfer_reference = %reference, error = %e, "Saga run failed");
                }
            });
        }

        Ok(submission)
    }

    pub async fn get_transfer(&self, reference: &str) -> Result<Transfer, AppError> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or(AppError::TransferNotFound)
    }

    /// Transfers where `account_number` is source or destination, newest
    /// first. `limit` defaults to [`DEFAULT_LIST_LIMIT`] and is capped at
    /// [`MAX_LIST_LIMIT`].
    pub async fn list_account_transfers(
        &self,
        account_number: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Transfer>, AppError> {
        let limit = match limit {
            None => DEFAULT_LIST_LIMIT,
            Some(limit) if limit < 1 => {
                return Err(AppError::InvalidRequest(
                    "limit must be at least 1".to_string(),
                ));
            }
            Some(limit) => limit.min(MAX_LIST_LIMIT),
        };

        Ok(self.store.find_by_account(account_number, limit).await?)
    }
}

/// Check the request shape and build the record to insert.
///
/// # Rules
///
/// - Amount positive, below 10^16, with at most 4 decimal places
/// - Both account numbers present and different
/// - Currency is a 3-letter code (normalized to upper case)
/// - Idempotency key, when given, is 1-255 characters
/// - Description at most 500 characters
pub fn validate_request(request: SubmitTransferRequest) -> Result<NewTransfer, AppError> {
    let invalid = |msg: &str| -> Result<NewTransfer, AppError> {
        Err(AppError::InvalidRequest(msg.to_string()))
    };

    if request.amount <= Decimal::ZERO {
        return invalid("amount must be positive");
    }
    if request.amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return invalid("amount must have at most 4 decimal places");
    }
    if request.amount >= Decimal::from(AMOUNT_LIMIT) {
        return invalid("amount must be below 10^16");
    }

    let from = request.from_account_number.trim();
    let to = request.to_account_number.trim();
    if from.is_empty() || to.is_empty() {
        return invalid("from_account_number and to_account_number are required");
    }
    if from == to {
        return invalid("source and destination accounts must differ");
    }

    let currency = request.currency.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return invalid("currency must be a 3-letter ISO 4217 code");
    }

    if let Some(key) = &request.idempotency_key {
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return invalid("idempotency_key must be 1-255 characters");
        }
    }
    if let Some(description) = &request.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return invalid("description must be at most 500 characters");
        }
    }

    Ok(NewTransfer {
        transfer_reference: generate_reference(),
        idempotency_key: request.idempotency_key,
        from_account_number: from.to_string(),
        to_account_number: to.to_string(),
        amount: request.amount,
        currency,
        description: request.description,
        transfer_type: request.transfer_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::TransferType;
    use rust_decimal_macros::dec;

    fn request() -> SubmitTransferRequest {
        SubmitTransferRequest {
            idempotency_key: Some("K1".to_string()),
            from_account_number: "A".to_string(),
            to_account_number: "B".to_string(),
            amount: dec!(100.00),
            currency: "usd".to_string(),
            transfer_type: TransferType::Internal,
            description: None,
        }
    }

    fn rejects(request: SubmitTransferRequest) -> bool {
        matches!(validate_request(request), Err(AppError::InvalidRequest(_)))
    }

    #[test]
    fn test_valid_request_is_normalized() {
        let transfer = validate_request(request()).unwrap();
        assert_eq!(transfer.currency, "USD");
        assert!(transfer.transfer_reference.starts_with("TRF-"));
        assert_eq!(transfer.idempotency_key.as_deref(), Some("K1"));
    }

    #[test]
    fn test_amount_rules() {
        assert!(rejects(SubmitTransferRequest {
            amount: dec!(0),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            amount: dec!(-5),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            amount: dec!(1.00001),
            ..request()
        }));
        assert!(validate_request(SubmitTransferRequest {
            amount: dec!(1.2500000),
            ..request()
        })
        .is_ok());
        assert!(rejects(SubmitTransferRequest {
            amount: dec!(10000000000000000),
            ..request()
        }));
        assert!(validate_request(SubmitTransferRequest {
            amount: dec!(9999999999999999.9999),
            ..request()
        })
        .is_ok());
    }

    #[test]
    fn test_account_and_currency_rules() {
        assert!(rejects(SubmitTransferRequest {
            to_account_number: "A".to_string(),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            from_account_number: " ".to_string(),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            currency: "US".to_string(),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            currency: "U$D".to_string(),
            ..request()
        }));
    }

    #[test]
    fn test_key_and_description_limits() {
        assert!(rejects(SubmitTransferRequest {
            idempotency_key: Some(String::new()),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            idempotency_key: Some("k".repeat(256)),
            ..request()
        }));
        assert!(rejects(SubmitTransferRequest {
            description: Some("d".repeat(501)),
            ..request()
        }));
    }
}
