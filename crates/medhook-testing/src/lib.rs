//! Test infrastructure for deterministic delivery scenarios.
//!
//! [`TestEnv`] wires a [`DeliveryEngine`] to an in-memory store, a manually
//! advanced clock and a [`ScriptedTransport`], so retry schedules play out
//! without sleeping and without a network.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::SystemTime};

use anyhow::{bail, Context, Result};
use medhook_core::{
    storage::memory::MemoryStore, DeliveryId, DeliveryStatus, EndpointId, EventCatalog,
    TenantId, TestClock, WebhookDelivery, WebhookEndpoint,
};
use medhook_delivery::{DeliveryConfig, DeliveryEngine, RetryPolicy};

pub mod fixtures;
pub mod transport;

pub use fixtures::EndpointBuilder;
pub use transport::{ScriptedOutcome, ScriptedTransport};

/// Upper bound on retry rounds when driving a delivery to completion.
const MAX_ROUNDS: usize = 64;

/// Builder for [`TestEnv`].
#[derive(Debug, Clone)]
pub struct TestEnvBuilder {
    config: DeliveryConfig,
    catalog: EventCatalog,
    fallback: ScriptedOutcome,
}

impl TestEnvBuilder {
    /// Sets the consecutive-failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets the outcome of unscripted attempts.
    #[must_use]
    pub fn receiver(mut self, fallback: ScriptedOutcome) -> Self {
        self.fallback = fallback;
        self
    }

    /// Replaces the event catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: EventCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects the configuration.
    pub fn build(self) -> Result<TestEnv> {
        let store = Arc::new(MemoryStore::new());
        let clock = TestClock::new();
        let transport = Arc::new(ScriptedTransport::with_fallback(self.fallback));
        let engine = DeliveryEngine::with_transport(
            store.clone(),
            self.catalog,
            self.config,
            Arc::new(clock.clone()),
            transport.clone(),
        )
        .context("failed to build delivery engine")?;

        Ok(TestEnv { engine: Arc::new(engine), store, clock, transport, tenant: TenantId::new() })
    }
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            config: DeliveryConfig::default(),
            catalog: EventCatalog::default(),
            fallback: ScriptedOutcome::Status(200),
        }
    }
}

/// Engine plus the handles tests need to drive and inspect it.
pub struct TestEnv {
    /// Engine under test. Not started; drive it with
    /// [`TestEnv::deliver_due`] and [`TestEnv::drive_to_completion`].
    pub engine: Arc<DeliveryEngine>,
    /// Backing store.
    pub store: Arc<MemoryStore>,
    /// Clock shared with the engine.
    pub clock: TestClock,
    /// Fake receiver.
    pub transport: Arc<ScriptedTransport>,
    /// Default tenant for the test.
    pub tenant: TenantId,
}

impl TestEnv {
    /// Environment with default configuration and a receiver answering 200.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be built.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Starts a builder.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    /// Registers an endpoint for the default tenant.
    pub async fn create_endpoint(&self, builder: EndpointBuilder) -> Result<WebhookEndpoint> {
        Ok(self.engine.create_endpoint(self.tenant, builder.build()).await?)
    }

    /// Current state of an endpoint of the default tenant.
    pub async fn endpoint(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        Ok(self.engine.get_endpoint(self.tenant, id).await?)
    }

    /// Current state of a delivery of the default tenant.
    pub async fn delivery(&self, id: DeliveryId) -> Result<WebhookDelivery> {
        Ok(self.engine.get_delivery(self.tenant, id).await?)
    }

    /// Submits an event for the default tenant, returning its deliveries.
    pub async fn submit(
        &self,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Vec<DeliveryId>> {
        Ok(self.engine.submit_event(self.tenant, event_type, data).await?.deliveries)
    }

    /// Attempts everything due at the current test time.
    pub async fn deliver_due(&self) -> Result<usize> {
        Ok(self.engine.run_pending().await?)
    }

    /// Moves the clock to `delivery`'s next retry time, if it has one.
    pub fn advance_to_retry(&self, delivery: &WebhookDelivery) {
        if let Some(next_retry_at) = delivery.next_retry_at {
            self.clock.jump_to(SystemTime::from(next_retry_at));
        }
    }

    /// Attempts a delivery, then keeps advancing the clock to each retry
    /// until it reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Fails if the delivery does not settle within a bounded number of
    /// rounds.
    pub async fn drive_to_completion(&self, id: DeliveryId) -> Result<WebhookDelivery> {
        for _ in 0..MAX_ROUNDS {
            self.deliver_due().await?;
            let delivery = self.delivery(id).await?;
            match delivery.status {
                DeliveryStatus::Success | DeliveryStatus::Failed => return Ok(delivery),
                DeliveryStatus::Retrying => self.advance_to_retry(&delivery),
                DeliveryStatus::Pending => {},
            }
        }
        bail!("delivery {id} did not settle within {MAX_ROUNDS} rounds")
    }
}
