//! In-memory transfer store.
//!
//! Holds every record behind one lock so the idempotency-key check and the
//! insert are a single atomic step, matching the unique constraint of the
//! PostgreSQL table.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Result, StoreError, TransferStore, check_transition};
use crate::models::transfer::{NewTransfer, Transfer, TransferUpdate};

#[derive(Default)]
struct Records {
    by_reference: HashMap<String, Transfer>,
    /// idempotency key -> transfer reference
    by_key: HashMap<String, String>,
}

/// Process-local transfer store.
#[derive(Default)]
pub struct InMemoryTransferStore {
    records: RwLock<Records>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.by_reference.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn insert(&self, transfer: NewTransfer) -> Result<Transfer> {
        let mut records = self.records.write().await;

        if records.by_reference.contains_key(&transfer.transfer_reference) {
            return Err(StoreError::DuplicateReference(transfer.transfer_reference));
        }
        if let Some(key) = &transfer.idempotency_key {
            if records.by_key.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
            }
        }

        let record = transfer.into_pending(Utc::now());
        if let Some(key) = &record.idempotency_key {
            records
                .by_key
                .insert(key.clone(), record.transfer_reference.clone());
        }
        records
            .by_reference
            .insert(record.transfer_reference.clone(), record.clone());

        Ok(record)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>> {
        Ok(self.records.read().await.by_reference.get(reference).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>> {
        let records = self.records.read().await;
        Ok(records
            .by_key
            .get(key)
            .and_then(|reference| records.by_reference.get(reference))
            .cloned())
    }

    async fn find_by_account(&self, account_number: &str, limit: i64) -> Result<Vec<Transfer>> {
        let records = self.records.read().await;
        let mut matching: Vec<Transfer> = records
            .by_reference
            .values()
            .filter(|t| {
                t.from_account_number == account_number || t.to_account_number == account_number
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(matching)
    }

    async fn transition(
        &self,
        reference: &str,
        expected_version: i64,
        update: TransferUpdate,
    ) -> Result<Transfer> {
        let mut records = self.records.write().await;
        let current = records
            .by_reference
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        check_transition(current, expected_version, &update)?;

        let next = current.apply(&update, Utc::now());
        *current = next.clone();
        Ok(next)
    }

    async fn find_stuck(&self, updated_before: DateTime<Utc>, limit: i64) -> Result<Vec<Transfer>> {
        let records = self.records.read().await;
        let mut stuck: Vec<Transfer> = records
            .by_reference
            .values()
            .filter(|t| !t.status.is_terminal() && t.updated_at <= updated_before)
            .cloned()
            .collect();

        stuck.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stuck.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stuck)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
