//! Transfer lifecycle event models.
//!
//! One event is emitted when a transfer is accepted and one when it reaches
//! a terminal status. Consumers must tolerate duplicates and delays.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transfer::{Transfer, TransferStatus};

/// Bus topic an event is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    #[serde(rename = "transfer.initiated")]
    Initiated,
    #[serde(rename = "transfer.completed")]
    Completed,
    #[serde(rename = "transfer.failed")]
    Failed,
    #[serde(rename = "transfer.compensated")]
    Compensated,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Initiated => "transfer.initiated",
            EventTopic::Completed => "transfer.completed",
            EventTopic::Failed => "transfer.failed",
            EventTopic::Compensated => "transfer.compensated",
        }
    }

    /// Topic for a terminal status, `None` for in-flight statuses.
    pub fn for_terminal(status: TransferStatus) -> Option<Self> {
        match status {
            TransferStatus::Completed => Some(EventTopic::Completed),
            TransferStatus::Failed => Some(EventTopic::Failed),
            TransferStatus::Compensated => Some(EventTopic::Compensated),
            _ => None,
        }
    }
}

/// Event payload delivered to every sink.
///
/// # JSON Example
///
/// ```json
/// {
///   "event_id": "8d7c1a9e-3f5b-4a61-9a0e-1f2b3c4d5e6f",
///   "topic": "transfer.completed",
///   "transfer_reference": "TRF-9b2f0c0e5d7a4c4f9a51c2d1f6a0e3b7",
///   "from_account_number": "ACC-1001",
///   "to_account_number": "ACC-2002",
///   "amount": "100.00",
///   "currency": "USD",
///   "status": "COMPLETED",
///   "failure_reason": null,
///   "initiated_at": "2025-12-21T16:00:00Z",
///   "completed_at": "2025-12-21T16:00:01Z",
///   "occurred_at": "2025-12-21T16:00:01Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub event_id: Uuid,
    pub topic: EventTopic,
    pub transfer_reference: String,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn new(topic: EventTopic, transfer: &Transfer) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic,
            transfer_reference: transfer.transfer_reference.clone(),
            from_account_number: transfer.from_account_number.clone(),
            to_account_number: transfer.to_account_number.clone(),
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            status: transfer.status,
            failure_reason: transfer.failure_reason.clone(),
            initiated_at: transfer.initiated_at,
            completed_at: transfer.completed_at,
            occurred_at: Utc::now(),
        }
    }
}
