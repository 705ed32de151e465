//! In-memory store for tests and single-process deployments.
//!
//! All state sits behind one `RwLock`, so every trait method is atomic. The
//! subscription index keeps `list_active_for` proportional to the number of
//! subscribers, and the due queue keeps claim scans proportional to the
//! number of due deliveries.

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{lease_expiry, ClaimToken, ClaimedDelivery, WebhookStore};
use crate::{
    error::{CoreError, Result},
    models::{
        AttemptApplied, AttemptRecord, AttemptTransition, DeliveryId, EndpointId, EndpointStatus,
        EventType, Pagination, TenantId, WebhookDelivery, WebhookEndpoint,
    },
    validation::EndpointChanges,
};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: ClaimToken,
    until: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    endpoints: HashMap<EndpointId, WebhookEndpoint>,
    subscriptions: HashMap<(TenantId, EventType), BTreeSet<EndpointId>>,
    deliveries: HashMap<DeliveryId, WebhookDelivery>,
    by_endpoint: HashMap<EndpointId, Vec<DeliveryId>>,
    due: BTreeSet<(DateTime<Utc>, DeliveryId)>,
    leases: HashMap<DeliveryId, Lease>,
}

impl State {
    fn endpoint(&self, tenant: TenantId, id: EndpointId) -> Option<&WebhookEndpoint> {
        self.endpoints.get(&id).filter(|endpoint| endpoint.tenant_id == tenant)
    }

    fn delivery(&self, tenant: TenantId, id: DeliveryId) -> Option<&WebhookDelivery> {
        self.deliveries.get(&id).filter(|delivery| delivery.tenant_id == tenant)
    }

    fn subscribe(&mut self, endpoint: &WebhookEndpoint) {
        for event_type in &endpoint.event_types {
            self.subscriptions
                .entry((endpoint.tenant_id, event_type.clone()))
                .or_default()
                .insert(endpoint.id);
        }
    }

    fn unsubscribe(&mut self, endpoint: &WebhookEndpoint) {
        for event_type in &endpoint.event_types {
            let key = (endpoint.tenant_id, event_type.clone());
            if let Some(ids) = self.subscriptions.get_mut(&key) {
                ids.remove(&endpoint.id);
                if ids.is_empty() {
                    self.subscriptions.remove(&key);
                }
            }
        }
    }

    fn lease(&mut self, delivery: &WebhookDelivery, until: DateTime<Utc>) -> ClaimedDelivery {
        let token = ClaimToken::new();
        self.due.remove(&(delivery.due_at(), delivery.id));
        self.leases.insert(delivery.id, Lease { token, until });
        ClaimedDelivery { delivery: delivery.clone(), token, lease_until: until }
    }

    /// Returns expired leases on non-terminal deliveries to the due queue.
    fn expire_leases(&mut self, now: DateTime<Utc>) {
        let expired: Vec<DeliveryId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.until <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.leases.remove(&id);
            if let Some(delivery) = self.deliveries.get(&id) {
                if !delivery.status.is_terminal() {
                    self.due.insert((delivery.due_at(), id));
                }
            }
        }
    }
}

/// Process-local [`WebhookStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint> {
        let mut state = self.state.write().await;
        state.subscribe(&endpoint);
        state.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    async fn find_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
    ) -> Result<Option<WebhookEndpoint>> {
        Ok(self.state.read().await.endpoint(tenant, id).cloned())
    }

    async fn list_endpoints(&self, tenant: TenantId) -> Result<Vec<WebhookEndpoint>> {
        let state = self.state.read().await;
        let mut endpoints: Vec<_> =
            state.endpoints.values().filter(|e| e.tenant_id == tenant).cloned().collect();
        endpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(endpoints)
    }

    async fn update_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
        changes: EndpointChanges,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint> {
        let mut state = self.state.write().await;
        let current = state
            .endpoint(tenant, id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("endpoint", id))?;

        let mut updated = current.clone();
        updated.apply_changes(changes, now);

        state.unsubscribe(&current);
        state.subscribe(&updated);
        state.endpoints.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_endpoint(&self, tenant: TenantId, id: EndpointId) -> Result<()> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoint(tenant, id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("endpoint", id))?;
        state.unsubscribe(&endpoint);
        state.endpoints.remove(&id);
        Ok(())
    }

    async fn set_endpoint_status(
        &self,
        tenant: TenantId,
        id: EndpointId,
        status: EndpointStatus,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoints
            .get_mut(&id)
            .filter(|endpoint| endpoint.tenant_id == tenant)
            .ok_or_else(|| CoreError::not_found("endpoint", id))?;
        endpoint.apply_manual_status(status, now)?;
        Ok(endpoint.clone())
    }

    async fn list_active_for(
        &self,
        tenant: TenantId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookEndpoint>> {
        let state = self.state.read().await;
        let Some(ids) = state.subscriptions.get(&(tenant, event_type.clone())) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.endpoints.get(id))
            .filter(|endpoint| endpoint.is_active())
            .cloned()
            .collect())
    }

    async fn insert_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> Result<()> {
        let mut state = self.state.write().await;
        for delivery in deliveries {
            state.by_endpoint.entry(delivery.endpoint_id).or_default().push(delivery.id);
            state.due.insert((delivery.due_at(), delivery.id));
            state.deliveries.insert(delivery.id, delivery);
        }
        Ok(())
    }

    async fn find_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>> {
        Ok(self.state.read().await.delivery(tenant, id).cloned())
    }

    async fn list_deliveries(
        &self,
        tenant: TenantId,
        endpoint: EndpointId,
        page: Pagination,
    ) -> Result<Vec<WebhookDelivery>> {
        let state = self.state.read().await;
        let Some(ids) = state.by_endpoint.get(&endpoint) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.delivery(tenant, *id))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDelivery>> {
        let mut state = self.state.write().await;
        state.expire_leases(now);

        let ready: Vec<DeliveryId> = state
            .due
            .iter()
            .take_while(|(due_at, _)| *due_at <= now)
            .take(limit)
            .map(|(_, id)| *id)
            .collect();

        let until = lease_expiry(now, lease);
        let mut claims = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(delivery) = state.deliveries.get(&id).cloned() else {
                continue;
            };
            claims.push(state.lease(&delivery, until));
        }
        Ok(claims)
    }

    async fn claim_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimedDelivery> {
        let mut state = self.state.write().await;
        let delivery = state
            .delivery(tenant, id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("delivery", id))?;

        if delivery.status.is_terminal() {
            return Err(CoreError::DeliveryFinalized { id, status: delivery.status });
        }
        if state.leases.get(&id).is_some_and(|lease| lease.until > now) {
            return Err(CoreError::ClaimConflict { id });
        }

        Ok(state.lease(&delivery, lease_expiry(now, lease)))
    }

    async fn release_claim(&self, claim: &ClaimedDelivery) -> Result<()> {
        let mut state = self.state.write().await;
        let id = claim.delivery.id;
        if state.leases.get(&id).is_some_and(|lease| lease.token == claim.token) {
            state.leases.remove(&id);
            let key = state
                .deliveries
                .get(&id)
                .filter(|delivery| !delivery.status.is_terminal())
                .map(|delivery| (delivery.due_at(), id));
            if let Some(key) = key {
                state.due.insert(key);
            }
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        claim: &ClaimedDelivery,
        record: AttemptRecord,
        failure_threshold: u32,
    ) -> Result<AttemptApplied> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let id = claim.delivery.id;

        let delivery = state
            .deliveries
            .get_mut(&id)
            .filter(|delivery| delivery.tenant_id == claim.delivery.tenant_id)
            .ok_or_else(|| CoreError::not_found("delivery", id))?;
        if delivery.status.is_terminal() {
            return Err(CoreError::DeliveryFinalized { id, status: delivery.status });
        }
        if !state.leases.get(&id).is_some_and(|lease| lease.token == claim.token) {
            return Err(CoreError::ClaimConflict { id });
        }

        state.leases.remove(&id);
        delivery.apply_attempt(&record);
        let delivery = delivery.clone();
        if matches!(record.transition, AttemptTransition::Retrying { .. }) {
            state.due.insert((delivery.due_at(), id));
        }

        let at = record.capture.attempted_at;
        let mut endpoint_tripped = false;
        let endpoint = state
            .endpoints
            .get_mut(&delivery.endpoint_id)
            .filter(|endpoint| endpoint.tenant_id == delivery.tenant_id)
            .map(|endpoint| {
                match record.transition {
                    AttemptTransition::Succeeded => endpoint.record_success(at),
                    AttemptTransition::Retrying { .. } => endpoint.record_retry(at),
                    AttemptTransition::Failed | AttemptTransition::Exhausted => {
                        endpoint_tripped = endpoint.record_terminal_failure(failure_threshold, at);
                    },
                    AttemptTransition::Suspended => {},
                }
                endpoint.clone()
            });

        Ok(AttemptApplied { delivery, endpoint, endpoint_tripped })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;
    use crate::{
        models::{AttemptCapture, DeliveryStatus, EventEnvelope, EventId},
        validation::NewEndpoint,
    };

    const LEASE: Duration = Duration::from_secs(300);

    fn billing() -> EventType {
        EventType::parse("billing.created").unwrap()
    }

    fn endpoint(tenant: TenantId, retry_count: u32) -> WebhookEndpoint {
        let input = NewEndpoint {
            name: "billing sink".into(),
            description: None,
            url: "https://sink.example.com".into(),
            event_types: vec![billing()],
            timeout_seconds: 30,
            retry_count,
        };
        WebhookEndpoint::new(tenant, input, "whsec_test".into(), Utc::now())
    }

    fn delivery_for(endpoint: &WebhookEndpoint, now: DateTime<Utc>) -> WebhookDelivery {
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            event_type: billing(),
            created_at: now,
            tenant_id: endpoint.tenant_id,
            data: serde_json::json!({"invoice": 1}),
        };
        WebhookDelivery::pending(&envelope, endpoint, "{}".into(), now)
    }

    fn record(transition: AttemptTransition, at: DateTime<Utc>) -> AttemptRecord {
        AttemptRecord {
            capture: AttemptCapture {
                http_status: Some(500),
                error_message: Some("server error: HTTP 500".into()),
                attempted_at: at,
                ..Default::default()
            },
            transition,
        }
    }

    #[tokio::test]
    async fn list_active_for_uses_subscription_index() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let active = store.insert_endpoint(endpoint(tenant, 3)).await.unwrap();
        let paused = store.insert_endpoint(endpoint(tenant, 3)).await.unwrap();
        store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        store
            .set_endpoint_status(tenant, paused.id, EndpointStatus::Paused, Utc::now())
            .await
            .unwrap();

        let matched = store.list_active_for(tenant, &billing()).await.unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, active.id);
    }

    #[tokio::test]
    async fn update_moves_subscriptions() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let ep = store.insert_endpoint(endpoint(tenant, 3)).await.unwrap();
        let paid = EventType::parse("billing.paid").unwrap();

        let changes =
            EndpointChanges { event_types: Some(vec![paid.clone()]), ..Default::default() };
        store.update_endpoint(tenant, ep.id, changes, Utc::now()).await.unwrap();

        assert!(store.list_active_for(tenant, &billing()).await.unwrap().is_empty());
        assert_eq!(store.list_active_for(tenant, &paid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tenant_scoping_hides_foreign_records() {
        let store = MemoryStore::new();
        let owner = TenantId::new();
        let other = TenantId::new();
        let ep = store.insert_endpoint(endpoint(owner, 3)).await.unwrap();

        assert!(store.find_endpoint(other, ep.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_endpoint(other, ep.id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(store.find_endpoint(owner, ep.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claimed_delivery_is_not_claimed_twice() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        store.insert_deliveries(vec![delivery_for(&ep, now)]).await.unwrap();

        let first = store.claim_due(now, 10, LEASE).await.unwrap();
        let second = store.claim_due(now, 10, LEASE).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_makes_delivery_claimable_again() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        store.insert_deliveries(vec![delivery_for(&ep, now)]).await.unwrap();

        let stale = store.claim_due(now, 10, LEASE).await.unwrap().remove(0);
        let later = now + TimeDelta::seconds(301);
        let fresh = store.claim_due(later, 10, LEASE).await.unwrap();
        assert_eq!(fresh.len(), 1);

        let err = store
            .record_attempt(&stale, record(AttemptTransition::Succeeded, later), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ClaimConflict { .. }));
    }

    #[tokio::test]
    async fn retrying_delivery_waits_for_next_retry_at() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        store.insert_deliveries(vec![delivery_for(&ep, now)]).await.unwrap();
        let claim = store.claim_due(now, 10, LEASE).await.unwrap().remove(0);

        let next_retry_at = now + TimeDelta::seconds(5);
        let applied = store
            .record_attempt(&claim, record(AttemptTransition::Retrying { next_retry_at }, now), 10)
            .await
            .unwrap();
        assert_eq!(applied.delivery.status, DeliveryStatus::Retrying);
        assert_eq!(applied.delivery.attempt, 2);

        assert!(store.claim_due(now + TimeDelta::seconds(4), 10, LEASE).await.unwrap().is_empty());
        assert_eq!(store.claim_due(next_retry_at, 10, LEASE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_delivery_rejects_claims_and_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 0)).await.unwrap();
        let delivery = delivery_for(&ep, now);
        store.insert_deliveries(vec![delivery.clone()]).await.unwrap();
        let claim = store.claim_due(now, 10, LEASE).await.unwrap().remove(0);
        store.record_attempt(&claim, record(AttemptTransition::Failed, now), 10).await.unwrap();

        let claim_err =
            store.claim_delivery(ep.tenant_id, delivery.id, now, LEASE).await.unwrap_err();
        let record_err = store
            .record_attempt(&claim, record(AttemptTransition::Succeeded, now), 10)
            .await
            .unwrap_err();

        assert!(matches!(claim_err, CoreError::DeliveryFinalized { .. }));
        assert!(matches!(record_err, CoreError::DeliveryFinalized { .. }));
        let stored = store.find_delivery(ep.tenant_id, delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.http_status, Some(500));
    }

    #[tokio::test]
    async fn suspension_does_not_count_toward_threshold() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 0)).await.unwrap();
        store.insert_deliveries(vec![delivery_for(&ep, now)]).await.unwrap();
        let claim = store.claim_due(now, 10, LEASE).await.unwrap().remove(0);

        let applied = store
            .record_attempt(&claim, record(AttemptTransition::Suspended, now), 1)
            .await
            .unwrap();

        assert_eq!(applied.delivery.status, DeliveryStatus::Failed);
        assert_eq!(applied.endpoint.unwrap().failure_count, 0);
        assert!(!applied.endpoint_tripped);
    }

    #[tokio::test]
    async fn concurrent_terminal_failures_trip_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 0)).await.unwrap();
        let deliveries: Vec<_> = (0..20).map(|_| delivery_for(&ep, now)).collect();
        store.insert_deliveries(deliveries).await.unwrap();
        let claims = store.claim_due(now, 20, LEASE).await.unwrap();

        let handles: Vec<_> = claims
            .into_iter()
            .map(|claim| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_attempt(&claim, record(AttemptTransition::Failed, now), 10)
                        .await
                        .unwrap()
                        .endpoint_tripped
                })
            })
            .collect();

        let mut trips = 0;
        for handle in handles {
            if handle.await.unwrap() {
                trips += 1;
            }
        }

        let stored = store.find_endpoint(ep.tenant_id, ep.id).await.unwrap().unwrap();
        assert_eq!(trips, 1);
        assert_eq!(stored.failure_count, 20);
        assert_eq!(stored.status, EndpointStatus::Failed);
    }

    #[tokio::test]
    async fn deliveries_listed_newest_first_with_pagination() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        let mut ids = Vec::new();
        for offset in 0..5 {
            let delivery = delivery_for(&ep, now + TimeDelta::seconds(offset));
            ids.push(delivery.id);
            store.insert_deliveries(vec![delivery]).await.unwrap();
        }

        let page = store
            .list_deliveries(ep.tenant_id, ep.id, Pagination::new(Some(2), Some(1)))
            .await
            .unwrap();

        assert_eq!(page.iter().map(|d| d.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn deleted_endpoint_keeps_deliveries() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ep = store.insert_endpoint(endpoint(TenantId::new(), 3)).await.unwrap();
        let delivery = delivery_for(&ep, now);
        store.insert_deliveries(vec![delivery.clone()]).await.unwrap();

        store.delete_endpoint(ep.tenant_id, ep.id).await.unwrap();

        assert!(store.find_delivery(ep.tenant_id, delivery.id).await.unwrap().is_some());
        assert!(store.list_active_for(ep.tenant_id, &billing()).await.unwrap().is_empty());
    }
}
