//! PostgreSQL transfer store.
//!
//! Uniqueness of `transfer_reference` and `idempotency_key` is enforced by
//! table constraints. Transitions are a single conditional `UPDATE ... WHERE
//! version = $n`, so two drivers racing on one row cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Result, StoreError, TransferStore, check_transition};
use crate::db::DbPool;
use crate::models::transfer::{NewTransfer, Transfer, TransferStatus, TransferUpdate};

const IDEMPOTENCY_KEY_CONSTRAINT: &str = "uq_transfers_idempotency_key";
const REFERENCE_CONSTRAINT: &str = "transfers_pkey";

/// Transfer store backed by the `transfers` table.
#[derive(Clone)]
pub struct PostgresTransferStore {
    pool: DbPool,
}

impl PostgresTransferStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Translate unique violations into domain errors.
fn map_insert_error(err: sqlx::Error, transfer: &NewTransfer) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(IDEMPOTENCY_KEY_CONSTRAINT) => {
                    return StoreError::DuplicateIdempotencyKey(
                        transfer.idempotency_key.clone().unwrap_or_default(),
                    );
                }
                Some(REFERENCE_CONSTRAINT) => {
                    return StoreError::DuplicateReference(transfer.transfer_reference.clone());
                }
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl TransferStore for PostgresTransferStore {
    async fn insert(&self, transfer: NewTransfer) -> Result<Transfer> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (
                transfer_reference,
                idempotency_key,
                from_account_number,
                to_account_number,
                amount,
                currency,
                description,
                transfer_type,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(&transfer.transfer_reference)
        .bind(&transfer.idempotency_key)
        .bind(&transfer.from_account_number)
        .bind(&transfer.to_account_number)
        .bind(transfer.amount)
        .bind(&transfer.currency)
        .bind(&transfer.description)
        .bind(transfer.transfer_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &transfer))
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>> {
        let transfer =
            sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE transfer_reference = $1")
                .bind(reference)
                .fetch_optional(&self.pool)
                .await?;

        Ok(transfer)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>> {
        let transfer =
            sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(transfer)
    }

    async fn find_by_account(&self, account_number: &str, limit: i64) -> Result<Vec<Transfer>> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT * FROM transfers
            WHERE from_account_number = $1 OR to_account_number = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }

    async fn transition(
        &self,
        reference: &str,
        expected_version: i64,
        update: TransferUpdate,
    ) -> Result<Transfer> {
        let current = self
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        // Edge check against the version we are about to condition on; the
        // WHERE clause guarantees the status has not moved underneath us.
        check_transition(&current, expected_version, &update)?;

        let written = sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET status = $3,
                failure_reason = COALESCE($4, failure_reason),
                compensation_attempts = COALESCE($5, compensation_attempts),
                completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END,
                updated_at = NOW(),
                version = version + 1
            WHERE transfer_reference = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(reference)
        .bind(expected_version)
        .bind(update.status.as_str())
        .bind(&update.failure_reason)
        .bind(update.compensation_attempts)
        .bind(update.status.is_terminal())
        .fetch_optional(&self.pool)
        .await?;

        match written {
            Some(transfer) => Ok(transfer),
            None => {
                let actual: i64 =
                    sqlx::query_scalar("SELECT version FROM transfers WHERE transfer_reference = $1")
                        .bind(reference)
                        .fetch_one(&self.pool)
                        .await?;
                Err(StoreError::VersionConflict {
                    reference: reference.to_string(),
                    expected: expected_version,
                    actual,
                })
            }
        }
    }

    async fn find_stuck(&self, updated_before: DateTime<Utc>, limit: i64) -> Result<Vec<Transfer>> {
        let statuses: Vec<String> = TransferStatus::NON_TERMINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT * FROM transfers
            WHERE status = ANY($1) AND updated_at <= $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
        )
        .bind(statuses)
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
