//! Worker pool management with structured concurrency.
//!
//! Workers share one receiving end of the scheduler's channel. Each attempt
//! runs to completion once started; cancellation only stops workers from
//! taking new claims.

use std::{sync::Arc, time::Duration};

use medhook_core::ClaimedDelivery;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    engine::EngineStats,
    error::{DeliveryError, Result},
    executor::DeliveryExecutor,
    ledger::DeliveryLedger,
};

/// Supervised set of delivery workers.
pub struct WorkerPool {
    worker_count: usize,
    executor: Arc<DeliveryExecutor>,
    ledger: DeliveryLedger,
    receiver: Arc<Mutex<mpsc::Receiver<ClaimedDelivery>>>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool that will drain `receiver` with `worker_count` workers.
    pub fn new(
        worker_count: usize,
        executor: Arc<DeliveryExecutor>,
        ledger: DeliveryLedger,
        receiver: mpsc::Receiver<ClaimedDelivery>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            worker_count,
            executor,
            ledger,
            receiver: Arc::new(Mutex::new(receiver)),
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns all workers. Returns immediately.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.worker_count, "spawning delivery workers");

        self.stats.write().await.active_workers = self.worker_count;

        for worker_id in 0..self.worker_count {
            let executor = self.executor.clone();
            let receiver = self.receiver.clone();
            let cancellation_token = self.cancellation_token.clone();

            let handle = tokio::spawn(async move {
                info!(worker_id, "delivery worker starting");
                let mut processed = 0u64;

                loop {
                    let next = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            biased;
                            () = cancellation_token.cancelled() => None,
                            claim = receiver.recv() => claim,
                        }
                    };
                    let Some(claim) = next else { break };

                    executor.process(claim).await;
                    processed += 1;
                }

                info!(worker_id, processed, "delivery worker stopped");
            });

            self.worker_handles.push(handle);
        }
    }

    /// Signals cancellation and waits for in-flight attempts to finish.
    ///
    /// Claims still queued in the channel are released so the next scan can
    /// pick them up again.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers do not stop within
    /// `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.worker_handles);

        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                }
            }
        };

        let joined = tokio::time::timeout(timeout, join_all).await;
        self.stats.write().await.active_workers = 0;

        if joined.is_err() {
            error!(
                timeout_seconds = timeout.as_secs(),
                "worker shutdown timed out, some workers may still be running"
            );
            return Err(DeliveryError::ShutdownTimeout { timeout_seconds: timeout.as_secs() });
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(claim) = receiver.try_recv() {
            if let Err(e) = self.ledger.release(&claim).await {
                warn!(
                    delivery_id = %claim.delivery.id,
                    error = %e,
                    "failed to release queued claim"
                );
            }
        }

        info!("worker pool shutdown completed");
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active_count,
                "worker pool dropped with active workers; forcing cancellation"
            );
            self.cancellation_token.cancel();
            warn!("call shutdown_graceful() before dropping the worker pool");
        }
    }
}
