//! Event intake and subscription matching.
//!
//! Intake turns a domain event into one pending delivery per active
//! subscriber and returns without touching the network. The scheduler is
//! woken so the first attempt does not wait for the next poll.

use std::sync::Arc;

use medhook_core::{
    Clock, DeliveryId, EndpointId, EventEnvelope, EventId, EventType, Result, TenantId,
    WebhookDelivery, WebhookEndpoint, WebhookStore,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::registry::EndpointRegistry;

/// Finds the endpoints an event fans out to.
#[derive(Clone)]
pub struct Matcher {
    registry: EndpointRegistry,
}

impl Matcher {
    /// Creates a matcher reading subscriptions from `registry`.
    pub fn new(registry: EndpointRegistry) -> Self {
        Self { registry }
    }

    /// Active endpoints of `tenant` subscribed to `event_type`.
    pub async fn matching(
        &self,
        tenant: TenantId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookEndpoint>> {
        self.registry.list_active_for(tenant, event_type).await
    }
}

/// Result of a submitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedEvent {
    /// Identifier assigned to the event.
    pub event_id: EventId,
    /// One delivery per matched endpoint.
    pub deliveries: Vec<DeliveryId>,
}

/// Accepts events and records their pending deliveries.
#[derive(Clone)]
pub struct EventIntake {
    store: Arc<dyn WebhookStore>,
    registry: EndpointRegistry,
    clock: Arc<dyn Clock>,
    matcher: Matcher,
    wake: Arc<Notify>,
}

impl EventIntake {
    /// Creates an intake that notifies `wake` whenever deliveries are queued.
    pub fn new(
        registry: EndpointRegistry,
        store: Arc<dyn WebhookStore>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
    ) -> Self {
        let matcher = Matcher::new(registry.clone());
        Self { store, registry, clock, matcher, wake }
    }

    /// Accepts a domain event and creates one pending delivery per active
    /// subscriber.
    ///
    /// No subscribers is not an error; the event simply yields no
    /// deliveries. Submitting the same data twice creates two events.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` on `eventType` for unknown or reserved
    /// types.
    pub async fn submit(
        &self,
        tenant: TenantId,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<SubmittedEvent> {
        let event_type = self.registry.catalog().resolve(event_type)?;
        let envelope = self.envelope(tenant, event_type, data);

        let endpoints = self.matcher.matching(tenant, &envelope.event_type).await?;
        let deliveries = self.enqueue(&envelope, &endpoints).await?;

        info!(
            tenant_id = %tenant,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            deliveries = deliveries.len(),
            "event accepted"
        );
        Ok(SubmittedEvent { event_id: envelope.event_id, deliveries })
    }

    /// Queues a synthetic `webhook.test` event for exactly one endpoint,
    /// regardless of its subscriptions.
    pub async fn send_test_event(
        &self,
        tenant: TenantId,
        endpoint_id: EndpointId,
    ) -> Result<EventId> {
        let endpoint = self.registry.get(tenant, endpoint_id).await?;

        let data = json!({
            "test": true,
            "message": "Test delivery from medhook",
            "endpointId": endpoint.id,
            "endpointName": endpoint.name,
        });
        let envelope = self.envelope(tenant, EventType::test(), data);
        self.enqueue(&envelope, std::slice::from_ref(&endpoint)).await?;

        info!(
            tenant_id = %tenant,
            endpoint_id = %endpoint_id,
            event_id = %envelope.event_id,
            "test event queued"
        );
        Ok(envelope.event_id)
    }

    fn envelope(
        &self,
        tenant: TenantId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            event_type,
            created_at: self.clock.now_utc(),
            tenant_id: tenant,
            data,
        }
    }

    async fn enqueue(
        &self,
        envelope: &EventEnvelope,
        endpoints: &[WebhookEndpoint],
    ) -> Result<Vec<DeliveryId>> {
        if endpoints.is_empty() {
            debug!(event_id = %envelope.event_id, "no active subscribers");
            return Ok(Vec::new());
        }

        // Serialized once so every attempt sends byte-identical bodies.
        let payload = serde_json::to_string(envelope)?;
        let now = self.clock.now_utc();
        let deliveries: Vec<_> = endpoints
            .iter()
            .map(|endpoint| WebhookDelivery::pending(envelope, endpoint, payload.clone(), now))
            .collect();
        let ids = deliveries.iter().map(|delivery| delivery.id).collect();

        self.store.insert_deliveries(deliveries).await?;
        self.wake.notify_one();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use medhook_core::{
        storage::memory::MemoryStore, CoreError, DeliveryStatus, EndpointSpec, EventCatalog,
        Pagination, TestClock,
    };

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: EndpointRegistry,
        intake: EventIntake,
        wake: Arc<Notify>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(EventCatalog::default());
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let wake = Arc::new(Notify::new());
        let registry = EndpointRegistry::new(store.clone(), catalog, clock.clone());
        Fixture {
            intake: EventIntake::new(registry.clone(), store.clone(), clock, wake.clone()),
            registry,
            store,
            wake,
        }
    }

    fn spec(event_type: &str) -> EndpointSpec {
        EndpointSpec {
            name: "pharmacy".into(),
            url: "https://pharmacy.example.com/hooks".into(),
            event_types: vec![event_type.to_string()],
            ..EndpointSpec::default()
        }
    }

    #[tokio::test]
    async fn fans_out_to_active_subscribers_only() {
        let f = fixture();
        let tenant = TenantId::new();
        f.registry.create(tenant, spec("prescription.created")).await.unwrap();
        f.registry.create(tenant, spec("prescription.created")).await.unwrap();
        let paused = f.registry.create(tenant, spec("prescription.created")).await.unwrap();
        f.registry.create(tenant, spec("billing.created")).await.unwrap();
        f.registry
            .set_status(tenant, paused.id, medhook_core::EndpointStatus::Paused)
            .await
            .unwrap();

        let submitted =
            f.intake.submit(tenant, "prescription.created", json!({"rx": "RX-1"})).await.unwrap();

        assert_eq!(submitted.deliveries.len(), 2);
        for id in &submitted.deliveries {
            let delivery = f.store.find_delivery(tenant, *id).await.unwrap().unwrap();
            assert_eq!(delivery.status, DeliveryStatus::Pending);
            assert_eq!(delivery.attempt, 1);
            assert_eq!(delivery.event_id, submitted.event_id);
        }
    }

    #[tokio::test]
    async fn matcher_follows_registry_status_changes() {
        let f = fixture();
        let tenant = TenantId::new();
        let endpoint = f.registry.create(tenant, spec("billing.created")).await.unwrap();
        let matcher = Matcher::new(f.registry.clone());
        let billing = EventType::parse("billing.created").unwrap();

        assert_eq!(matcher.matching(tenant, &billing).await.unwrap().len(), 1);
        assert!(matcher.matching(TenantId::new(), &billing).await.unwrap().is_empty());

        f.registry
            .set_status(tenant, endpoint.id, medhook_core::EndpointStatus::Inactive)
            .await
            .unwrap();

        assert!(matcher.matching(tenant, &billing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_subscribers_is_not_an_error() {
        let f = fixture();

        let submitted =
            f.intake.submit(TenantId::new(), "inventory.low_stock", json!({})).await.unwrap();

        assert!(submitted.deliveries.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_reserved_types_are_rejected() {
        let f = fixture();
        let tenant = TenantId::new();

        let unknown = f.intake.submit(tenant, "billing.exploded", json!({})).await.unwrap_err();
        let reserved = f.intake.submit(tenant, "webhook.test", json!({})).await.unwrap_err();

        assert_eq!(unknown.field(), Some("eventType"));
        assert_eq!(reserved.field(), Some("eventType"));
    }

    #[tokio::test]
    async fn repeated_submits_create_separate_events() {
        let f = fixture();
        let tenant = TenantId::new();
        f.registry.create(tenant, spec("billing.paid")).await.unwrap();

        let first = f.intake.submit(tenant, "billing.paid", json!({"invoice": 7})).await.unwrap();
        let second = f.intake.submit(tenant, "billing.paid", json!({"invoice": 7})).await.unwrap();

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(first.deliveries.len(), second.deliveries.len());
    }

    #[tokio::test]
    async fn payload_is_the_wire_envelope() {
        let f = fixture();
        let tenant = TenantId::new();
        let endpoint = f.registry.create(tenant, spec("lab.result_ready")).await.unwrap();

        let submitted =
            f.intake.submit(tenant, "lab.result_ready", json!({"specimen": "S-9"})).await.unwrap();
        let delivery =
            f.store.find_delivery(tenant, submitted.deliveries[0]).await.unwrap().unwrap();
        let body: serde_json::Value = serde_json::from_str(&delivery.payload).unwrap();

        assert_eq!(delivery.endpoint_id, endpoint.id);
        assert_eq!(body["eventId"], json!(submitted.event_id));
        assert_eq!(body["eventType"], "lab.result_ready");
        assert_eq!(body["tenantId"], json!(tenant));
        assert_eq!(body["data"]["specimen"], "S-9");
        assert!(body["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_event_targets_one_endpoint_regardless_of_subscriptions() {
        let f = fixture();
        let tenant = TenantId::new();
        let endpoint = f.registry.create(tenant, spec("billing.created")).await.unwrap();
        f.registry.create(tenant, spec("billing.created")).await.unwrap();

        let event_id = f.intake.send_test_event(tenant, endpoint.id).await.unwrap();
        let deliveries =
            f.store.list_deliveries(tenant, endpoint.id, Pagination::default()).await.unwrap();

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event_id, event_id);
        assert!(deliveries[0].event_type.is_reserved());
    }

    #[tokio::test]
    async fn test_event_for_unknown_endpoint_is_not_found() {
        let f = fixture();

        let err = f.intake.send_test_event(TenantId::new(), EndpointId::new()).await.unwrap_err();

        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn queuing_wakes_the_scheduler() {
        let f = fixture();
        let tenant = TenantId::new();
        f.registry.create(tenant, spec("triage.completed")).await.unwrap();

        f.intake.submit(tenant, "triage.completed", json!({})).await.unwrap();

        // notify_one stores a permit when nobody is waiting yet.
        tokio::time::timeout(std::time::Duration::from_secs(1), f.wake.notified())
            .await
            .unwrap();
    }
}
