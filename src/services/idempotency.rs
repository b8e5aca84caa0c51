//! Idempotency guard for transfer submission.
//!
//! A caller-supplied idempotency key maps to at most one transfer. A retried
//! submission gets the original record back verbatim instead of starting a
//! second saga. The store's unique constraint is the final arbiter: when two
//! identical submissions race past the lookup, the loser's insert fails and
//! it re-reads the winner's record.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::transfer::{NewTransfer, Transfer};
use crate::store::{StoreError, TransferStore};

/// Outcome of an intake attempt.
#[derive(Debug, Clone)]
pub struct Submission {
    pub transfer: Transfer,
    /// `true` when an earlier submission with the same key was returned
    pub replayed: bool,
}

pub struct IdempotencyGuard {
    store: Arc<dyn TransferStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Existing transfer for `key`, if any.
    pub async fn resolve(&self, key: &str) -> Result<Option<Transfer>, StoreError> {
        self.store.find_by_idempotency_key(key).await
    }

    /// Create the transfer unless its key was already used.
    pub async fn create_or_fetch(&self, transfer: NewTransfer) -> Result<Submission, StoreError> {
        if let Some(key) = transfer.idempotency_key.as_deref() {
            if let Some(existing) = self.resolve(key).await? {
                return Ok(replay(&transfer, existing));
            }
        }

        match self.store.insert(transfer.clone()).await {
            Ok(created) => Ok(Submission {
                transfer: created,
                replayed: false,
            }),
            Err(StoreError::DuplicateIdempotencyKey(key)) => {
                debug!(idempotency_key = %key, "Lost insert race; returning winner");
                let existing = self
                    .resolve(&key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?;
                Ok(replay(&transfer, existing))
            }
            Err(e) => Err(e),
        }
    }
}

fn replay(requested: &NewTransfer, existing: Transfer) -> Submission {
    if !requested.matches(&existing) {
        warn!(
            transfer_reference = %existing.transfer_reference,
            idempotency_key = existing.idempotency_key.as_deref().unwrap_or(""),
            "Idempotency key reused with a different payload; returning original transfer"
        );
    }
    Submission {
        transfer: existing,
        replayed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::{TransferType, generate_reference};
    use crate::store::InMemoryTransferStore;
    use rust_decimal_macros::dec;

    fn request(key: Option<&str>) -> NewTransfer {
        NewTransfer {
            transfer_reference: generate_reference(),
            idempotency_key: key.map(str::to_string),
            from_account_number: "A".to_string(),
            to_account_number: "B".to_string(),
            amount: dec!(100.00),
            currency: "USD".to_string(),
            description: None,
            transfer_type: TransferType::Internal,
        }
    }

    #[tokio::test]
    async fn test_second_submission_replays_first() {
        let guard = IdempotencyGuard::new(Arc::new(InMemoryTransferStore::new()));

        let first = guard.create_or_fetch(request(Some("K1"))).await.unwrap();
        let second = guard.create_or_fetch(request(Some("K1"))).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(
            first.transfer.transfer_reference,
            second.transfer.transfer_reference
        );
    }

    #[tokio::test]
    async fn test_reused_key_with_different_payload_returns_original() {
        let guard = IdempotencyGuard::new(Arc::new(InMemoryTransferStore::new()));
        let first = guard.create_or_fetch(request(Some("K1"))).await.unwrap();

        let mut different = request(Some("K1"));
        different.amount = dec!(5.00);
        let second = guard.create_or_fetch(different).await.unwrap();

        assert!(second.replayed);
        assert_eq!(second.transfer, first.transfer);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_create_one_record() {
        let store = Arc::new(InMemoryTransferStore::new());
        let guard = Arc::new(IdempotencyGuard::new(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.create_or_fetch(request(Some("K1"))).await })
            })
            .collect();

        let mut references = Vec::new();
        for handle in handles {
            references.push(handle.await.unwrap().unwrap().transfer.transfer_reference);
        }

        assert_eq!(store.len().await, 1);
        assert!(references.iter().all(|r| r == &references[0]));
    }
}
