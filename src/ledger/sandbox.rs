//! In-process sandbox ledger.
//!
//! Implements the ledger contract (per-account balances, idempotent postings
//! keyed by reference) for local runs without a ledger service and for tests.
//! Faults can be injected per posting kind to simulate an unreliable network.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use super::{LedgerApi, LedgerError};
use crate::models::ledger::{
    AccountStatus, LedgerAccount, LedgerReceipt, PostingKind, PostingRequest, RejectionReason,
};

/// Simulated failure for the next posting of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxFault {
    /// Fail with HTTP 503 without applying the posting
    Unavailable,
    /// Apply the posting, then lose the response (HTTP 503)
    ApplyThenUnavailable,
    /// Never answer
    Hang,
}

#[derive(Debug, Clone)]
struct SandboxAccount {
    status: AccountStatus,
    currency: String,
    balance: Decimal,
}

type PostingResult = Result<LedgerReceipt, RejectionReason>;

#[derive(Default)]
struct SandboxState {
    accounts: HashMap<String, SandboxAccount>,
    /// (kind, reference) -> receipt of an applied posting
    postings: HashMap<(PostingKind, String), LedgerReceipt>,
    faults: HashMap<PostingKind, VecDeque<SandboxFault>>,
    calls: HashMap<PostingKind, usize>,
    applied: HashMap<PostingKind, usize>,
    unreachable: bool,
}

/// Sandbox implementation of [`LedgerApi`].
#[derive(Default)]
pub struct SandboxLedger {
    state: Mutex<SandboxState>,
}

impl SandboxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_account(&self, account_number: &str, currency: &str, balance: Decimal) {
        self.state.lock().await.accounts.insert(
            account_number.to_string(),
            SandboxAccount {
                status: AccountStatus::Active,
                currency: currency.to_string(),
                balance,
            },
        );
    }

    pub async fn set_status(&self, account_number: &str, status: AccountStatus) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(account_number) {
            account.status = status;
        }
    }

    pub async fn balance(&self, account_number: &str) -> Option<Decimal> {
        self.state
            .lock()
            .await
            .accounts
            .get(account_number)
            .map(|a| a.balance)
    }

    /// Make the next `count` postings of `kind` fail with `fault`.
    pub async fn inject_faults(&self, kind: PostingKind, fault: SandboxFault, count: usize) {
        let mut state = self.state.lock().await;
        let queue = state.faults.entry(kind).or_default();
        queue.extend(std::iter::repeat_n(fault, count));
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Fail every call, including lookups, with HTTP 503.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Calls received for `kind`, including failed and duplicate ones.
    pub async fn calls(&self, kind: PostingKind) -> usize {
        self.state.lock().await.calls.get(&kind).copied().unwrap_or(0)
    }

    /// Postings of `kind` that actually moved funds.
    pub async fn applied(&self, kind: PostingKind) -> usize {
        self.state.lock().await.applied.get(&kind).copied().unwrap_or(0)
    }

    /// Whether a posting with this reference moved funds.
    pub async fn was_applied(&self, kind: PostingKind, reference: &str) -> bool {
        self.state
            .lock()
            .await
            .postings
            .contains_key(&(kind, reference.to_string()))
    }

    async fn post(
        &self,
        kind: PostingKind,
        request: &PostingRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        let fault = {
            let mut state = self.state.lock().await;
            *state.calls.entry(kind).or_default() += 1;
            if state.unreachable {
                return Err(LedgerError::Server { status: 503 });
            }
            state.faults.get_mut(&kind).and_then(VecDeque::pop_front)
        };

        match fault {
            Some(SandboxFault::Unavailable) => Err(LedgerError::Server { status: 503 }),
            Some(SandboxFault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LedgerError::Server { status: 504 })
            }
            Some(SandboxFault::ApplyThenUnavailable) => {
                let _ = self.apply(kind, request).await;
                Err(LedgerError::Server { status: 503 })
            }
            None => self.apply(kind, request).await.map_err(LedgerError::Rejected),
        }
    }

    async fn apply(&self, kind: PostingKind, request: &PostingRequest) -> PostingResult {
        let mut state = self.state.lock().await;
        let key = (kind, request.reference.clone());

        // Rejections moved no funds, so only applied postings are replayed.
        if let Some(original) = state.postings.get(&key) {
            debug!(%kind, reference = %request.reference, "Sandbox ledger replaying posting");
            return Ok(original.clone());
        }

        let result = match state.accounts.get_mut(&request.account_number) {
            None => Err(RejectionReason::AccountNotFound),
            Some(account) if account.status != AccountStatus::Active => {
                Err(RejectionReason::AccountNotActive)
            }
            Some(account) if account.currency != request.currency => {
                Err(RejectionReason::Other("CURRENCY_MISMATCH".to_string()))
            }
            Some(account) => match kind {
                PostingKind::Debit if account.balance < request.amount => {
                    Err(RejectionReason::InsufficientFunds)
                }
                PostingKind::Debit => {
                    account.balance -= request.amount;
                    Ok(LedgerReceipt {
                        balance_after: account.balance,
                    })
                }
                PostingKind::Credit => {
                    account.balance += request.amount;
                    Ok(LedgerReceipt {
                        balance_after: account.balance,
                    })
                }
            },
        };

        if let Ok(receipt) = &result {
            *state.applied.entry(kind).or_default() += 1;
            state.postings.insert(key, receipt.clone());
        }
        result
    }
}

#[async_trait]
impl LedgerApi for SandboxLedger {
    async fn debit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post(PostingKind::Debit, request).await
    }

    async fn credit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post(PostingKind::Credit, request).await
    }

    async fn get_account(&self, account_number: &str) -> Result<Option<LedgerAccount>, LedgerError> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(LedgerError::Server { status: 503 });
        }

        Ok(state
            .accounts
            .get(account_number)
            .map(|account| LedgerAccount {
                account_number: account_number.to_string(),
                status: account.status,
                currency: account.currency.clone(),
            }))
    }
}
