//! Retry scheduler: finds due deliveries and hands them to workers.
//!
//! All scheduling state (status, `next_retry_at`, leases) lives in the store,
//! so the scheduler itself is stateless and a restart loses nothing.

use std::{sync::Arc, time::Duration};

use medhook_core::{ClaimedDelivery, Clock, Result, WebhookStore};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::DeliveryExecutor;

/// Claims from one scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Deliveries claimed in total, including suspended ones.
    pub claimed: usize,
    /// Claims whose endpoint is active, ready for an attempt.
    pub ready: Vec<ClaimedDelivery>,
}

/// Periodically claims due deliveries.
pub struct RetryScheduler {
    store: Arc<dyn WebhookStore>,
    executor: Arc<DeliveryExecutor>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
    batch_size: usize,
    poll_interval: Duration,
    claim_lease: Duration,
}

impl RetryScheduler {
    /// Creates a scheduler. `wake` lets intake trigger an immediate scan.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        executor: Arc<DeliveryExecutor>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
        batch_size: usize,
        poll_interval: Duration,
        claim_lease: Duration,
    ) -> Self {
        Self { store, executor, clock, wake, batch_size, poll_interval, claim_lease }
    }

    /// Claims up to one batch of due deliveries.
    ///
    /// Claims whose endpoint is missing or not active are suspended on the
    /// spot and left out of `ready`. If an endpoint lookup fails, every claim
    /// of the batch not yet suspended is released before the error is
    /// returned.
    pub async fn scan_once(&self) -> Result<ScanOutcome> {
        let claims =
            self.store.claim_due(self.clock.now_utc(), self.batch_size, self.claim_lease).await?;
        let claimed = claims.len();
        let mut ready = Vec::with_capacity(claimed);

        let mut claims = claims.into_iter();
        while let Some(claim) = claims.next() {
            let delivery = &claim.delivery;
            let endpoint =
                match self.store.find_endpoint(delivery.tenant_id, delivery.endpoint_id).await {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        self.release_all(std::iter::once(claim).chain(ready).chain(claims)).await;
                        return Err(e);
                    },
                };
            let reason = match endpoint {
                Some(endpoint) if endpoint.is_active() => {
                    ready.push(claim);
                    continue;
                },
                Some(endpoint) => format!("endpoint is {}", endpoint.status),
                None => "endpoint no longer exists".to_string(),
            };
            if let Err(e) = self.executor.suspend(&claim, reason).await {
                warn!(delivery_id = %claim.delivery.id, error = %e, "failed to suspend delivery");
            }
        }

        if claimed > 0 {
            debug!(claimed, ready = ready.len(), "scheduler scan");
        }
        Ok(ScanOutcome { claimed, ready })
    }

    /// Scans until cancelled, sending ready claims to `tx`.
    ///
    /// Sleeps `poll_interval` between scans unless woken early or the last
    /// scan filled a whole batch. Claims not yet handed over at cancellation
    /// are released.
    pub async fn run(
        &self,
        tx: mpsc::Sender<ClaimedDelivery>,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis(),
            "retry scheduler starting"
        );

        'scan: loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let mut full_batch = false;
            match self.scan_once().await {
                Ok(outcome) => {
                    full_batch = outcome.claimed >= self.batch_size;
                    let mut pending = outcome.ready.into_iter();
                    while let Some(claim) = pending.next() {
                        tokio::select! {
                            sent = tx.send(claim.clone()) => {
                                if sent.is_err() {
                                    self.release_all(std::iter::once(claim).chain(pending)).await;
                                    break 'scan;
                                }
                            }
                            () = cancellation_token.cancelled() => {
                                self.release_all(std::iter::once(claim).chain(pending)).await;
                                break 'scan;
                            }
                        }
                    }
                },
                Err(e) => error!(error = %e, "scheduler scan failed"),
            }

            if full_batch {
                continue;
            }

            tokio::select! {
                () = cancellation_token.cancelled() => break,
                () = self.clock.sleep(self.poll_interval) => {},
                () = self.wake.notified() => {},
            }
        }

        info!("retry scheduler stopped");
        Ok(())
    }

    async fn release_all(&self, claims: impl Iterator<Item = ClaimedDelivery>) {
        for claim in claims {
            if let Err(e) = self.store.release_claim(&claim).await {
                warn!(delivery_id = %claim.delivery.id, error = %e, "failed to release claim");
            }
        }
    }
}
