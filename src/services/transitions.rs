//! Versioned state writes shared by every saga driver.
//!
//! The orchestrator, the compensation coordinator and (through them) the
//! recovery scanner all write through [`advance`], so lost-update handling
//! and terminal-event publishing behave the same everywhere.

use tracing::{debug, info};

use crate::models::event::EventTopic;
use crate::models::transfer::{Transfer, TransferUpdate};
use crate::services::event_publisher::EventPublisher;
use crate::store::{StoreError, TransferStore};

/// Errors that stop a saga driver.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Transfer not found: {0}")]
    NotFound(String),
}

/// Result of a conditional write.
#[derive(Debug)]
pub enum Advance {
    /// Our write landed; carries the new record.
    Written(Transfer),
    /// Another driver wrote first; carries the record as it is now.
    Superseded(Transfer),
}

/// Write `update` conditioned on the version of `transfer`.
///
/// On a version conflict the record is re-read and returned as
/// [`Advance::Superseded`]; the caller must drop its work and yield.
pub async fn advance(
    store: &dyn TransferStore,
    publisher: &EventPublisher,
    transfer: &Transfer,
    update: TransferUpdate,
) -> Result<Advance, SagaError> {
    let reference = &transfer.transfer_reference;

    match store
        .transition(reference, transfer.version, update)
        .await
    {
        Ok(next) => {
            if next.status != transfer.status {
                info!(
                    transfer_reference = %reference,
                    from = %transfer.status,
                    to = %next.status,
                    failure_reason = next.failure_reason.as_deref().unwrap_or(""),
                    "Transfer advanced"
                );
            }
            if let Some(topic) = EventTopic::for_terminal(next.status) {
                publisher.publish(topic, &next);
            }
            Ok(Advance::Written(next))
        }
        Err(StoreError::VersionConflict {
            expected, actual, ..
        }) => {
            debug!(
                transfer_reference = %reference,
                expected,
                actual,
                "Transfer written by another driver; yielding"
            );
            let current = store
                .find_by_reference(reference)
                .await?
                .ok_or_else(|| SagaError::NotFound(reference.clone()))?;
            Ok(Advance::Superseded(current))
        }
        Err(e) => Err(e.into()),
    }
}
