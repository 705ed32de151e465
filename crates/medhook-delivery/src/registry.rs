//! Endpoint registry: tenant-scoped endpoint configuration.

use std::sync::Arc;

use medhook_core::{
    Clock, CoreError, EndpointId, EndpointPatch, EndpointSpec, EndpointStatus, EventCatalog,
    EventType, Result, TenantId, WebhookEndpoint, WebhookStore,
};
use tracing::info;

use crate::signing;

/// Creates, changes and looks up endpoints.
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<dyn WebhookStore>,
    catalog: Arc<EventCatalog>,
    clock: Arc<dyn Clock>,
}

impl EndpointRegistry {
    /// Creates a registry over `store`, accepting subscriptions from `catalog`.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        catalog: Arc<EventCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, catalog, clock }
    }

    /// Validates and registers a new active endpoint with a fresh secret.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` naming the first offending field;
    /// nothing is stored in that case.
    pub async fn create(&self, tenant: TenantId, spec: EndpointSpec) -> Result<WebhookEndpoint> {
        let input = spec.validate(&self.catalog)?;
        let endpoint =
            WebhookEndpoint::new(tenant, input, signing::generate_secret(), self.clock.now_utc());
        let endpoint = self.store.insert_endpoint(endpoint).await?;

        info!(
            tenant_id = %tenant,
            endpoint_id = %endpoint.id,
            subscriptions = endpoint.event_types.len(),
            "endpoint registered"
        );
        Ok(endpoint)
    }

    /// Applies a partial configuration change.
    ///
    /// Input is validated before the endpoint is looked up, so a malformed
    /// patch reports `Validation` even for unknown endpoints.
    pub async fn update(
        &self,
        tenant: TenantId,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> Result<WebhookEndpoint> {
        let changes = patch.validate(&self.catalog)?;
        let endpoint = self.store.update_endpoint(tenant, id, changes, self.clock.now_utc()).await?;

        info!(tenant_id = %tenant, endpoint_id = %id, "endpoint updated");
        Ok(endpoint)
    }

    /// Removes an endpoint. Its delivery history stays queryable.
    pub async fn delete(&self, tenant: TenantId, id: EndpointId) -> Result<()> {
        self.store.delete_endpoint(tenant, id).await?;
        info!(tenant_id = %tenant, endpoint_id = %id, "endpoint deleted");
        Ok(())
    }

    /// Applies an operator status change.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidStatusTransition` when the state machine
    /// forbids the move, including any request for `failed`.
    pub async fn set_status(
        &self,
        tenant: TenantId,
        id: EndpointId,
        status: EndpointStatus,
    ) -> Result<WebhookEndpoint> {
        let endpoint =
            self.store.set_endpoint_status(tenant, id, status, self.clock.now_utc()).await?;

        info!(
            tenant_id = %tenant,
            endpoint_id = %id,
            status = %endpoint.status,
            failure_count = endpoint.failure_count,
            "endpoint status set"
        );
        Ok(endpoint)
    }

    /// Looks up one endpoint.
    pub async fn get(&self, tenant: TenantId, id: EndpointId) -> Result<WebhookEndpoint> {
        self.store
            .find_endpoint(tenant, id)
            .await?
            .ok_or_else(|| CoreError::not_found("endpoint", id))
    }

    /// Lists a tenant's endpoints, newest first.
    pub async fn list(&self, tenant: TenantId) -> Result<Vec<WebhookEndpoint>> {
        self.store.list_endpoints(tenant).await
    }

    /// Active subscribers of `event_type` within `tenant`.
    pub async fn list_active_for(
        &self,
        tenant: TenantId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookEndpoint>> {
        self.store.list_active_for(tenant, event_type).await
    }

    /// Vocabulary endpoints may subscribe to.
    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }
}
