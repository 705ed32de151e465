//! Webhook delivery engine: the public operations and the background runtime.
//!
//! ```text
//! submit_event ──▶ EventIntake ──▶ store (pending) ──┐
//!                                                    │ claim_due
//!                     ┌──────────────────────────────┘
//!                     ▼
//!              RetryScheduler ──mpsc──▶ WorkerPool ──▶ DeliveryExecutor ──▶ receiver
//!                                                          │
//!                                                          ▼
//!                                              DeliveryLedger + HealthMonitor
//! ```
//!
//! Every operation other than `start`/`shutdown` is tenant-scoped and
//! returns `medhook_core::Result`. HTTP outcomes never surface here; they are
//! recorded on the delivery.

use std::{sync::Arc, time::Duration};

use medhook_core::{
    AttemptApplied, Clock, CoreError, DeliveryId, EndpointId, EndpointPatch, EndpointSpec,
    EndpointStatus, EventCatalog, EventId, Pagination, Result as CoreResult, TenantId,
    WebhookDelivery, WebhookEndpoint, WebhookStore,
};
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex, Notify, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, WebhookTransport},
    error::{DeliveryError, Result},
    executor::DeliveryExecutor,
    health::{HealthMonitor, DEFAULT_FAILURE_THRESHOLD},
    intake::{EventIntake, SubmittedEvent},
    ledger::DeliveryLedger,
    registry::EndpointRegistry,
    retry::RetryPolicy,
    scheduler::RetryScheduler,
    worker_pool::WorkerPool,
};

/// Longest per-attempt timeout an endpoint can configure.
const MAX_ATTEMPT_TIMEOUT: Duration =
    Duration::from_secs(medhook_core::validation::MAX_TIMEOUT_SECONDS as u64);

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum deliveries claimed per scheduler scan.
    pub batch_size: usize,

    /// Pause between scheduler scans.
    pub poll_interval: Duration,

    /// How long a claim stays exclusive. Must exceed the largest endpoint
    /// timeout.
    pub claim_lease: Duration,

    /// Consecutive terminal failures that mark an endpoint `failed`.
    pub failure_threshold: u32,

    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,

    /// HTTP client configuration.
    pub client: ClientConfig,

    /// Backoff between attempts.
    pub retry_policy: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(5),
            claim_lease: Duration::from_secs(300),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            shutdown_timeout: Duration::from_secs(30),
            client: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(DeliveryError::configuration("batch_size must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(DeliveryError::configuration("failure_threshold must be at least 1"));
        }
        if self.claim_lease <= MAX_ATTEMPT_TIMEOUT {
            return Err(DeliveryError::configuration(format!(
                "claim_lease must exceed the maximum attempt timeout of {}s",
                MAX_ATTEMPT_TIMEOUT.as_secs()
            )));
        }
        if self.retry_policy.base_delay > self.retry_policy.max_delay {
            return Err(DeliveryError::configuration("retry base_delay exceeds max_delay"));
        }
        if !(0.0..=1.0).contains(&self.retry_policy.jitter_factor) {
            return Err(DeliveryError::configuration("retry jitter_factor must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Number of running delivery workers.
    pub active_workers: usize,
    /// HTTP attempts recorded since startup.
    pub attempts: u64,
    /// Deliveries that ended in `success`.
    pub successful_deliveries: u64,
    /// Attempts that failed with a retry scheduled.
    pub retries_scheduled: u64,
    /// Deliveries that ended in `failed` after exhausting retries.
    pub failed_deliveries: u64,
    /// Deliveries fast-failed because their endpoint was not active.
    pub suspended_deliveries: u64,
    /// Endpoints marked `failed` by the health monitor.
    pub endpoints_tripped: u64,
    /// Attempts currently waiting on a receiver.
    pub in_flight_deliveries: u64,
}

impl EngineStats {
    pub(crate) fn record(&mut self, applied: &AttemptApplied) {
        self.attempts += 1;
        match applied.delivery.status {
            medhook_core::DeliveryStatus::Success => self.successful_deliveries += 1,
            medhook_core::DeliveryStatus::Retrying => self.retries_scheduled += 1,
            medhook_core::DeliveryStatus::Failed => self.failed_deliveries += 1,
            medhook_core::DeliveryStatus::Pending => {},
        }
        if applied.endpoint_tripped {
            self.endpoints_tripped += 1;
        }
    }
}

struct Running {
    cancellation_token: CancellationToken,
    scheduler: JoinHandle<CoreResult<()>>,
    worker_pool: WorkerPool,
}

/// Main delivery engine.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn WebhookStore>,
    registry: EndpointRegistry,
    intake: EventIntake,
    ledger: DeliveryLedger,
    executor: Arc<DeliveryExecutor>,
    scheduler: Arc<RetryScheduler>,
    stats: Arc<RwLock<EngineStats>>,
    running: Mutex<Option<Running>>,
}

impl DeliveryEngine {
    /// Creates an engine delivering over HTTP with a `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for invalid settings or if the
    /// HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        catalog: EventCatalog,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let transport = Arc::new(DeliveryClient::new(config.client.clone())?);
        Self::with_transport(store, catalog, config, clock, transport)
    }

    /// Creates an engine using `transport` for outbound attempts.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for invalid settings.
    pub fn with_transport(
        store: Arc<dyn WebhookStore>,
        catalog: EventCatalog,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(catalog);
        let wake = Arc::new(Notify::new());
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let health = Arc::new(HealthMonitor::new(config.failure_threshold));

        let executor = Arc::new(DeliveryExecutor::new(
            store.clone(),
            transport,
            config.retry_policy.clone(),
            health,
            stats.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            store.clone(),
            executor.clone(),
            clock.clone(),
            wake.clone(),
            config.batch_size,
            config.poll_interval,
            config.claim_lease,
        ));

        let registry = EndpointRegistry::new(store.clone(), catalog, clock.clone());
        Ok(Self {
            intake: EventIntake::new(registry.clone(), store.clone(), clock.clone(), wake),
            registry,
            ledger: DeliveryLedger::new(store.clone()),
            executor,
            scheduler,
            stats,
            config,
            clock,
            store,
            running: Mutex::new(None),
        })
    }

    /// Spawns the scheduler and the worker pool. Returns immediately.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("delivery engine already running");
            return Ok(());
        }

        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            failure_threshold = self.config.failure_threshold,
            "starting webhook delivery engine"
        );

        let cancellation_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.batch_size.max(self.config.worker_count));

        let mut worker_pool = WorkerPool::new(
            self.config.worker_count,
            self.executor.clone(),
            self.ledger.clone(),
            rx,
            self.stats.clone(),
            cancellation_token.clone(),
        );
        worker_pool.spawn_workers().await;

        let scheduler = self.scheduler.clone();
        let scheduler_token = cancellation_token.clone();
        let scheduler = tokio::spawn(async move { scheduler.run(tx, scheduler_token).await });

        *running = Some(Running { cancellation_token, scheduler, worker_pool });
        info!("delivery engine started");
        Ok(())
    }

    /// Stops scanning and waits for in-flight attempts to finish.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers outlive the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            info!("delivery engine was not started, shutdown completed immediately");
            return Ok(());
        };

        info!("shutting down delivery engine");
        running.cancellation_token.cancel();

        match tokio::time::timeout(self.config.shutdown_timeout, running.scheduler).await {
            Ok(Ok(Ok(()))) => {},
            Ok(Ok(Err(e))) => error!(error = %e, "scheduler stopped with error"),
            Ok(Err(join_error)) => error!(error = %join_error, "scheduler task panicked"),
            Err(_) => warn!("scheduler did not stop within the shutdown timeout"),
        }

        running.worker_pool.shutdown_graceful(self.config.shutdown_timeout).await
    }

    /// Whether background delivery is running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Attempts every delivery that is due now, in the calling task, until
    /// none is left. Returns the number of deliveries handled.
    ///
    /// Deliveries rescheduled for later are not waited for. Useful for
    /// tests and one-shot draining without the background runtime.
    pub async fn run_pending(&self) -> CoreResult<usize> {
        let mut handled = 0;
        loop {
            let outcome = self.scheduler.scan_once().await?;
            if outcome.claimed == 0 {
                return Ok(handled);
            }
            handled += outcome.claimed;
            for claim in outcome.ready {
                self.executor.process(claim).await;
            }
        }
    }

    /// Registers an endpoint. See [`EndpointRegistry::create`].
    pub async fn create_endpoint(
        &self,
        tenant: TenantId,
        spec: EndpointSpec,
    ) -> CoreResult<WebhookEndpoint> {
        self.registry.create(tenant, spec).await
    }

    /// Changes endpoint configuration. See [`EndpointRegistry::update`].
    pub async fn update_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> CoreResult<WebhookEndpoint> {
        self.registry.update(tenant, id, patch).await
    }

    /// Removes an endpoint, keeping its deliveries. Deliveries still queued
    /// for it are suspended when they come due.
    pub async fn delete_endpoint(&self, tenant: TenantId, id: EndpointId) -> CoreResult<()> {
        self.registry.delete(tenant, id).await
    }

    /// Applies an operator status change.
    pub async fn set_endpoint_status(
        &self,
        tenant: TenantId,
        id: EndpointId,
        status: EndpointStatus,
    ) -> CoreResult<WebhookEndpoint> {
        self.registry.set_status(tenant, id, status).await
    }

    /// Looks up one endpoint.
    pub async fn get_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
    ) -> CoreResult<WebhookEndpoint> {
        self.registry.get(tenant, id).await
    }

    /// Lists a tenant's endpoints, newest first.
    pub async fn list_endpoints(&self, tenant: TenantId) -> CoreResult<Vec<WebhookEndpoint>> {
        self.registry.list(tenant).await
    }

    /// Queues a `webhook.test` delivery to one endpoint.
    pub async fn send_test_event(&self, tenant: TenantId, id: EndpointId) -> CoreResult<EventId> {
        self.intake.send_test_event(tenant, id).await
    }

    /// Accepts a domain event. See [`EventIntake::submit`].
    pub async fn submit_event(
        &self,
        tenant: TenantId,
        event_type: &str,
        data: serde_json::Value,
    ) -> CoreResult<SubmittedEvent> {
        self.intake.submit(tenant, event_type, data).await
    }

    /// Deliveries to one endpoint, newest first.
    pub async fn list_deliveries(
        &self,
        tenant: TenantId,
        endpoint: EndpointId,
        page: Pagination,
    ) -> CoreResult<Vec<WebhookDelivery>> {
        self.ledger.list_for_endpoint(tenant, endpoint, page).await
    }

    /// Looks up one delivery.
    pub async fn get_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
    ) -> CoreResult<WebhookDelivery> {
        self.ledger.get(tenant, id).await
    }

    /// Runs the next attempt of a delivery now, ignoring `next_retry_at`.
    ///
    /// The attempt runs on its own task, so it is recorded even if the caller
    /// stops waiting.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DeliveryFinalized` for `success` or `failed`
    /// deliveries, which are never touched again, and
    /// `CoreError::ClaimConflict` while a worker holds the delivery.
    pub async fn redeliver_now(
        &self,
        tenant: TenantId,
        id: DeliveryId,
    ) -> CoreResult<WebhookDelivery> {
        let claim = self
            .store
            .claim_delivery(tenant, id, self.clock.now_utc(), self.config.claim_lease)
            .await?;
        let executor = self.executor.clone();
        let applied = tokio::spawn(async move { executor.execute(&claim).await })
            .await
            .map_err(|e| CoreError::Storage(format!("redelivery task failed: {e}")))??;

        info!(
            tenant_id = %tenant,
            delivery_id = %id,
            status = %applied.delivery.status,
            "manual redelivery attempted"
        );
        Ok(applied.delivery)
    }

    /// Checks the store is reachable.
    pub async fn ping(&self) -> CoreResult<()> {
        self.store.ping().await
    }

    /// Current counters.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Event types endpoints may subscribe to.
    pub fn catalog(&self) -> &EventCatalog {
        self.registry.catalog()
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use medhook_core::{storage::memory::MemoryStore, TestClock};

    use super::*;

    #[test]
    fn default_config_is_valid() {
        DeliveryConfig::default().validate().unwrap();
    }

    #[test]
    fn lease_must_outlast_longest_timeout() {
        let config =
            DeliveryConfig { claim_lease: Duration::from_secs(120), ..DeliveryConfig::default() };
        assert!(matches!(config.validate(), Err(DeliveryError::Configuration { .. })));
    }

    #[test]
    fn zero_threshold_rejected() {
        let config = DeliveryConfig { failure_threshold: 0, ..DeliveryConfig::default() };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn shutdown_without_start_is_noop() {
        let engine = DeliveryEngine::new(
            Arc::new(MemoryStore::new()),
            EventCatalog::default(),
            DeliveryConfig::default(),
            Arc::new(TestClock::new()),
        )
        .unwrap();

        assert!(!engine.is_running().await);
        engine.shutdown().await.unwrap();
    }
}
