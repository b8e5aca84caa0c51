//! Recovery scanner.
//!
//! Periodically finds transfers that have sat in a non-terminal state for
//! longer than `stale_after` and hands each back to the orchestrator, which
//! resumes at the step implied by the stored status. This covers crashed
//! processes, abandoned deadlines and compensations that ran out of attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::services::orchestrator::SagaOrchestrator;
use crate::store::{StoreError, TransferStore};

/// Scanner cadence and batch limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Pause between scans
    pub interval: Duration,
    /// Minimum time since the last write before a transfer counts as stuck
    pub stale_after: Duration,
    /// Maximum transfers picked up per scan
    pub batch_size: i64,
    /// Transfers resumed concurrently within a scan
    pub concurrency: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            batch_size: 100,
            concurrency: 8,
        }
    }
}

/// Summary of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    /// Reached a terminal state during this scan
    pub resolved: usize,
    /// Still non-terminal afterwards
    pub pending: usize,
    pub errors: usize,
}

pub struct RecoveryScanner {
    store: Arc<dyn TransferStore>,
    orchestrator: Arc<SagaOrchestrator>,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    pub fn new(
        store: Arc<dyn TransferStore>,
        orchestrator: Arc<SagaOrchestrator>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    /// Run a single scan.
    ///
    /// Failure to resume one transfer is logged and counted; it does not
    /// stop the rest of the batch.
    pub async fn scan_once(&self) -> Result<RecoveryReport, StoreError> {
        let cutoff = stale_cutoff(Utc::now(), self.config.stale_after);
        let stuck = self
            .store
            .find_stuck(cutoff, self.config.batch_size)
            .await?;

        let mut report = RecoveryReport {
            scanned: stuck.len(),
            ..RecoveryReport::default()
        };
        if stuck.is_empty() {
            return Ok(report);
        }

        debug!(count = stuck.len(), %cutoff, "Resuming stuck transfers");

        let orchestrator = &self.orchestrator;
        let results: Vec<_> = futures::stream::iter(stuck)
            .map(|transfer| async move {
                let reference = transfer.transfer_reference.clone();
                let from = transfer.status;
                (reference, from, orchestrator.resume(transfer).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (reference, from, result) in results {
            match result {
                Ok(transfer) if transfer.status.is_terminal() => {
                    info!(
                        transfer_reference = %reference,
                        from = %from,
                        status = %transfer.status,
                        "Recovered transfer"
                    );
                    report.resolved += 1;
                }
                Ok(transfer) => {
                    debug!(
                        transfer_reference = %reference,
                        status = %transfer.status,
                        "Transfer still in progress after recovery pass"
                    );
                    report.pending += 1;
                }
                Err(e) => {
                    error!(transfer_reference = %reference, error = %e, "Recovery of transfer failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run [`scan_once`](Self::scan_once) every `interval` until stopped.
    pub fn spawn(self: Arc<Self>) -> RecoveryTaskHandle {
        let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
        let interval = self.config.interval;

        let join = tokio::spawn(async move {
            info!(interval = ?interval, "Recovery scanner started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match self.scan_once().await {
                            Ok(report) if report.scanned > 0 => info!(
                                scanned = report.scanned,
                                resolved = report.resolved,
                                pending = report.pending,
                                errors = report.errors,
                                "Recovery scan finished"
                            ),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Recovery scan failed"),
                        }
                    }
                    // A dropped handle counts as a stop request.
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Recovery scanner stopped");
                            break;
                        }
                    }
                }
            }
        });

        RecoveryTaskHandle {
            cancel: cancel_tx,
            join,
        }
    }
}

/// Handle to a running recovery scanner.
pub struct RecoveryTaskHandle {
    cancel: tokio::sync::watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl RecoveryTaskHandle {
    /// Signal the scanner to stop after its current scan.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the scanner and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.join.await {
            warn!(error = %e, "Recovery scanner exited abnormally");
        }
    }
}

fn stale_cutoff(now: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    let stale_after = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(stale_after)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
