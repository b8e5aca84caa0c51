//! Resilient ledger client.
//!
//! Every call goes through, from the outside in:
//! 1. Retry with exponential backoff and jitter (transient errors only)
//! 2. The shared `ledger-service` circuit breaker
//! 3. A per-attempt timeout
//!
//! Results are folded into [`LedgerOutcome`] / [`AccountLookup`] so the saga
//! only ever reasons about success, definitive rejection, or indeterminate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{LedgerApi, LedgerError};
use crate::models::ledger::{AccountLookup, LedgerOutcome, PostingKind, PostingRequest};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, RetryPolicy};

/// Registry key of the ledger's circuit breaker.
pub const LEDGER_DEPENDENCY: &str = "ledger-service";

/// Timeout and retry settings for ledger calls.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerClientPolicy {
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for LedgerClientPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Ledger client used by the saga.
pub struct LedgerClient {
    api: Arc<dyn LedgerApi>,
    breaker: Arc<CircuitBreaker>,
    policy: LedgerClientPolicy,
}

impl LedgerClient {
    pub fn new(
        api: Arc<dyn LedgerApi>,
        registry: &CircuitBreakerRegistry,
        policy: LedgerClientPolicy,
    ) -> Self {
        Self {
            api,
            breaker: registry.get(LEDGER_DEPENDENCY),
            policy,
        }
    }

    /// Debit `account_number`, keyed by `reference`.
    pub async fn debit(
        &self,
        account_number: &str,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> LedgerOutcome {
        self.post(
            PostingKind::Debit,
            PostingRequest {
                account_number: account_number.to_string(),
                amount,
                currency: currency.to_string(),
                reference: reference.to_string(),
            },
        )
        .await
    }

    /// Credit `account_number`, keyed by `reference`.
    pub async fn credit(
        &self,
        account_number: &str,
        amount: Decimal,
        currency: &str,
        reference: &str,
    ) -> LedgerOutcome {
        self.post(
            PostingKind::Credit,
            PostingRequest {
                account_number: account_number.to_string(),
                amount,
                currency: currency.to_string(),
                reference: reference.to_string(),
            },
        )
        .await
    }

    pub async fn get_account(&self, account_number: &str) -> AccountLookup {
        let api = &self.api;
        let result = self
            .with_resilience("get_account", account_number, move || async move {
                api.get_account(account_number).await
            })
            .await;

        match result {
            Ok(Some(account)) => AccountLookup::Found(account),
            Ok(None) | Err(LedgerError::Rejected(_)) => AccountLookup::NotFound,
            Err(e) => {
                warn!(account_number, error = %e, "Account lookup indeterminate");
                AccountLookup::Indeterminate(e.to_string())
            }
        }
    }

    async fn post(&self, kind: PostingKind, request: PostingRequest) -> LedgerOutcome {
        let api = &self.api;
        let request = &request;
        let result = self
            .with_resilience(kind.as_str(), &request.reference, move || async move {
                match kind {
                    PostingKind::Debit => api.debit(request).await,
                    PostingKind::Credit => api.credit(request).await,
                }
            })
            .await;

        match result {
            Ok(receipt) => {
                debug!(
                    operation = %kind,
                    reference = %request.reference,
                    balance_after = %receipt.balance_after,
                    "Ledger posting confirmed"
                );
                LedgerOutcome::Success {
                    balance_after: receipt.balance_after,
                }
            }
            Err(LedgerError::Rejected(reason)) => {
                debug!(operation = %kind, reference = %request.reference, %reason, "Ledger posting rejected");
                LedgerOutcome::Rejected(reason)
            }
            Err(e) => {
                warn!(
                    operation = %kind,
                    reference = %request.reference,
                    error = %e,
                    "Ledger posting indeterminate"
                );
                LedgerOutcome::Indeterminate(e.to_string())
            }
        }
    }

    async fn with_resilience<T, F, Fut>(
        &self,
        operation: &'static str,
        subject: &str,
        call: F,
    ) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let call = &call;
        let breaker = &self.breaker;
        let timeout = self.policy.timeout;

        let attempt = move || async move {
            breaker
                .call(
                    move || async move {
                        match tokio::time::timeout(timeout, call()).await {
                            Ok(result) => result,
                            Err(_) => Err(LedgerError::Timeout(timeout)),
                        }
                    },
                    LedgerError::counts_against_breaker,
                )
                .await
                .map_err(|e| match e {
                    CircuitBreakerError::Open { .. } => LedgerError::DependencyUnavailable,
                    CircuitBreakerError::Inner(inner) => inner,
                })
        };

        attempt
            .retry(self.policy.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(LedgerError::is_retryable)
            .notify(|err: &LedgerError, delay: Duration| {
                warn!(operation, subject, error = %err, retry_in = ?delay, "Ledger call failed, retrying");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sandbox::{SandboxFault, SandboxLedger};
    use crate::models::ledger::RejectionReason;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use rust_decimal_macros::dec;

    fn policy(max_retries: usize) -> LedgerClientPolicy {
        LedgerClientPolicy {
            timeout: Duration::from_millis(500),
            retry: RetryPolicy {
                max_retries,
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                jitter: false,
            },
        }
    }

    async fn setup(max_retries: usize) -> (Arc<SandboxLedger>, LedgerClient, CircuitBreakerRegistry) {
        let ledger = Arc::new(SandboxLedger::new());
        ledger.open_account("A", "USD", dec!(100.00)).await;
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let client = LedgerClient::new(ledger.clone(), &registry, policy(max_retries));
        (ledger, client, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let (ledger, client, _) = setup(3).await;
        ledger
            .inject_faults(PostingKind::Debit, SandboxFault::Unavailable, 2)
            .await;

        let outcome = client.debit("A", dec!(40.00), "USD", "TRF-1").await;

        assert_eq!(
            outcome,
            LedgerOutcome::Success {
                balance_after: dec!(60.00)
            }
        );
        assert_eq!(ledger.calls(PostingKind::Debit).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_indeterminate() {
        let (ledger, client, _) = setup(2).await;
        ledger
            .inject_faults(PostingKind::Debit, SandboxFault::Unavailable, 10)
            .await;

        let outcome = client.debit("A", dec!(40.00), "USD", "TRF-1").await;

        assert!(matches!(outcome, LedgerOutcome::Indeterminate(_)));
        assert_eq!(ledger.calls(PostingKind::Debit).await, 3);
        assert_eq!(ledger.balance("A").await, Some(dec!(100.00)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_retried() {
        let (ledger, client, _) = setup(3).await;

        let outcome = client.debit("A", dec!(400.00), "USD", "TRF-1").await;

        assert_eq!(
            outcome,
            LedgerOutcome::Rejected(RejectionReason::InsufficientFunds)
        );
        assert_eq!(ledger.calls(PostingKind::Debit).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ledger_times_out() {
        let (ledger, client, _) = setup(0).await;
        ledger
            .inject_faults(PostingKind::Credit, SandboxFault::Hang, 1)
            .await;

        let outcome = client.credit("A", dec!(1.00), "USD", "TRF-1").await;

        assert!(matches!(outcome, LedgerOutcome::Indeterminate(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast() {
        let (ledger, client, registry) = setup(0).await;
        ledger
            .inject_faults(PostingKind::Debit, SandboxFault::Unavailable, 100)
            .await;

        for i in 0..10 {
            client.debit("A", dec!(1.00), "USD", &format!("TRF-{i}")).await;
        }
        assert_eq!(registry.get(LEDGER_DEPENDENCY).state(), CircuitState::Open);

        let calls_before = ledger.calls(PostingKind::Debit).await;
        let outcome = client.debit("A", dec!(1.00), "USD", "TRF-X").await;

        assert_eq!(
            outcome,
            LedgerOutcome::Indeterminate("DEPENDENCY_UNAVAILABLE".to_string())
        );
        assert_eq!(ledger.calls(PostingKind::Debit).await, calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_of_missing_account() {
        let (_, client, _) = setup(0).await;
        assert_eq!(client.get_account("nope").await, AccountLookup::NotFound);
        assert!(matches!(client.get_account("A").await, AccountLookup::Found(_)));
    }
}
