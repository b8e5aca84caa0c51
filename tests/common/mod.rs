//! Shared utilities for integration tests.
//!
//! Assembles the full service from the in-memory store, the sandbox ledger
//! and the in-process event channel.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use transfer_saga::app::{Saga, SagaSettings};
use transfer_saga::ledger::{LedgerApi, LedgerClientPolicy, LedgerError, SandboxLedger};
use transfer_saga::models::event::{EventTopic, TransferEvent};
use transfer_saga::models::ledger::{AccountStatus, LedgerAccount, LedgerReceipt, PostingRequest};
use transfer_saga::models::transfer::{SubmitTransferRequest, Transfer, TransferStatus, TransferType, TransferUpdate};
use transfer_saga::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
use transfer_saga::services::compensation::CompensationPolicy;
use transfer_saga::services::event_publisher::{ChannelEventSink, EventPublisher, EventSink};
use transfer_saga::services::recovery::RecoveryConfig;
use transfer_saga::store::{InMemoryTransferStore, TransferStore};

pub struct Harness {
    pub store: Arc<InMemoryTransferStore>,
    pub ledger: Arc<SandboxLedger>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub saga: Saga,
    pub events: broadcast::Receiver<TransferEvent>,
}

/// Short timeouts and delays; every stale transfer is eligible for recovery.
pub fn fast_settings() -> SagaSettings {
    SagaSettings {
        ledger: LedgerClientPolicy {
            timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries: 2,
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                jitter: false,
            },
        },
        compensation: CompensationPolicy {
            max_attempts_per_run: 2,
            alert_after_attempts: 4,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        recovery: RecoveryConfig {
            interval: Duration::from_secs(1),
            stale_after: Duration::ZERO,
            batch_size: 100,
            concurrency: 4,
        },
        deadline: None,
    }
}

pub async fn harness() -> Harness {
    harness_with(fast_settings(), |sandbox| sandbox as Arc<dyn LedgerApi>).await
}

/// Build a harness whose ledger is `wrap(sandbox)`, so tests can decorate
/// the sandbox with extra behavior.
pub async fn harness_with<F>(settings: SagaSettings, wrap: F) -> Harness
where
    F: FnOnce(Arc<SandboxLedger>) -> Arc<dyn LedgerApi>,
{
    let store = Arc::new(InMemoryTransferStore::new());
    let ledger = Arc::new(SandboxLedger::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));

    let channel = ChannelEventSink::new();
    let events = channel.subscribe();
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(channel)];

    let saga = Saga::assemble(
        store.clone(),
        wrap(ledger.clone()),
        breakers.clone(),
        EventPublisher::new(sinks),
        settings,
    );

    Harness {
        store,
        ledger,
        breakers,
        saga,
        events,
    }
}

pub fn request(from: &str, to: &str, amount: Decimal, key: Option<&str>) -> SubmitTransferRequest {
    SubmitTransferRequest {
        idempotency_key: key.map(str::to_string),
        from_account_number: from.to_string(),
        to_account_number: to.to_string(),
        amount,
        currency: "USD".to_string(),
        transfer_type: TransferType::Internal,
        description: None,
    }
}

impl Harness {
    /// Record a transfer without starting its saga.
    pub async fn submit(&self, request: SubmitTransferRequest) -> Transfer {
        self.saga.transfers.submit(request).await.unwrap().transfer
    }

    pub async fn reload(&self, reference: &str) -> Transfer {
        self.store.find_by_reference(reference).await.unwrap().unwrap()
    }

    /// Walk a stored transfer through `statuses` as a driver would, without
    /// touching the ledger.
    pub async fn force(&self, reference: &str, statuses: &[TransferStatus]) -> Transfer {
        let mut transfer = self.reload(reference).await;
        for status in statuses {
            transfer = self
                .store
                .transition(reference, transfer.version, TransferUpdate::to(*status))
                .await
                .unwrap();
        }
        transfer
    }

    /// Collect events published so far.
    pub async fn drain_events(&mut self) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await
        {
            events.push(event);
        }
        events
    }

    /// Topics published for `reference`, sorted.
    pub async fn topics_for(&mut self, reference: &str) -> Vec<EventTopic> {
        let mut topics: Vec<EventTopic> = self
            .drain_events()
            .await
            .into_iter()
            .filter(|e| e.transfer_reference == reference)
            .map(|e| e.topic)
            .collect();
        topics.sort_by_key(|t| t.as_str());
        topics
    }
}

/// Ledger that closes the destination account right after the debit lands,
/// so the credit leg is rejected.
pub struct CloseDestinationAfterDebit {
    pub inner: Arc<SandboxLedger>,
    pub destination: String,
}

#[async_trait]
impl LedgerApi for CloseDestinationAfterDebit {
    async fn debit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        let receipt = self.inner.debit(request).await?;
        self.inner
            .set_status(&self.destination, AccountStatus::Closed)
            .await;
        Ok(receipt)
    }

    async fn credit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        self.inner.credit(request).await
    }

    async fn get_account(&self, account_number: &str) -> Result<Option<LedgerAccount>, LedgerError> {
        self.inner.get_account(account_number).await
    }
}
