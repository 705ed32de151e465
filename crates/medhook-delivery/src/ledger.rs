//! Delivery ledger: the audit trail of every event-to-endpoint delivery.

use std::sync::Arc;

use medhook_core::{
    AttemptApplied, AttemptRecord, ClaimedDelivery, CoreError, DeliveryId, EndpointId, Pagination,
    Result, TenantId, WebhookDelivery, WebhookStore,
};

/// Read and write access to delivery records.
#[derive(Clone)]
pub struct DeliveryLedger {
    store: Arc<dyn WebhookStore>,
}

impl DeliveryLedger {
    /// Creates a ledger over `store`.
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store }
    }

    /// Deliveries to one endpoint, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the endpoint is unknown within
    /// `tenant`, so callers can tell "no deliveries yet" from "no such
    /// endpoint".
    pub async fn list_for_endpoint(
        &self,
        tenant: TenantId,
        endpoint: EndpointId,
        page: Pagination,
    ) -> Result<Vec<WebhookDelivery>> {
        if self.store.find_endpoint(tenant, endpoint).await?.is_none() {
            return Err(CoreError::not_found("endpoint", endpoint));
        }
        self.store.list_deliveries(tenant, endpoint, page).await
    }

    /// Looks up one delivery. Works after its endpoint is deleted.
    pub async fn get(&self, tenant: TenantId, id: DeliveryId) -> Result<WebhookDelivery> {
        self.store
            .find_delivery(tenant, id)
            .await?
            .ok_or_else(|| CoreError::not_found("delivery", id))
    }

    /// Persists an attempt under `claim`, rolling it into the endpoint.
    pub async fn record(
        &self,
        claim: &ClaimedDelivery,
        record: AttemptRecord,
        failure_threshold: u32,
    ) -> Result<AttemptApplied> {
        self.store.record_attempt(claim, record, failure_threshold).await
    }

    /// Hands a lease back without recording anything.
    pub async fn release(&self, claim: &ClaimedDelivery) -> Result<()> {
        self.store.release_claim(claim).await
    }
}
