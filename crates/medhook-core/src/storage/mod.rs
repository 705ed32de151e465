//! Persistence seam for the endpoint registry and delivery ledger.
//!
//! [`WebhookStore`] is the only mutable shared state in the engine. Every
//! method is tenant-scoped except the scheduler's claim scan, which works
//! across tenants. Implementations must make each method atomic: in
//! particular [`WebhookStore::record_attempt`] updates the delivery and the
//! endpoint rollup (including the failure-threshold trip) as one unit.
//!
//! Two implementations ship: [`memory::MemoryStore`] for tests and
//! single-process deployments, and [`postgres::PgStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        AttemptApplied, AttemptRecord, DeliveryId, EndpointId, EndpointStatus, EventType,
        Pagination, TenantId, WebhookDelivery, WebhookEndpoint,
    },
    validation::EndpointChanges,
};

pub mod memory;
pub mod postgres;

/// Opaque proof that a worker holds the lease on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(pub Uuid);

impl ClaimToken {
    /// Creates a fresh token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A delivery leased to one worker for its next attempt.
///
/// While the lease is live no other claim on the delivery succeeds, which
/// keeps attempts on one delivery strictly sequential. A lease that expires
/// without a recorded attempt makes the delivery claimable again.
#[derive(Debug, Clone)]
pub struct ClaimedDelivery {
    /// Snapshot of the delivery at claim time.
    pub delivery: WebhookDelivery,
    /// Token to present when recording the attempt.
    pub token: ClaimToken,
    /// Lease expiry.
    pub lease_until: DateTime<Utc>,
}

/// Lease expiry for a claim taken at `now`. Saturates instead of
/// overflowing on absurd lease lengths.
pub(crate) fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Storage operations required by the registry, intake, scheduler and
/// executor.
#[async_trait]
pub trait WebhookStore: Send + Sync + 'static {
    /// Persists a new endpoint.
    async fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint>;

    /// Finds an endpoint within `tenant`.
    async fn find_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
    ) -> Result<Option<WebhookEndpoint>>;

    /// Lists a tenant's endpoints, newest first.
    async fn list_endpoints(&self, tenant: TenantId) -> Result<Vec<WebhookEndpoint>>;

    /// Applies validated configuration changes.
    ///
    /// Fails with `NotFound` if the endpoint is unknown within `tenant`.
    async fn update_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
        changes: EndpointChanges,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint>;

    /// Removes an endpoint. Its deliveries are kept for audit.
    ///
    /// Fails with `NotFound` if the endpoint is unknown within `tenant`.
    async fn delete_endpoint(&self, tenant: TenantId, id: EndpointId) -> Result<()>;

    /// Applies a manual status transition, see
    /// [`WebhookEndpoint::apply_manual_status`].
    async fn set_endpoint_status(
        &self,
        tenant: TenantId,
        id: EndpointId,
        status: EndpointStatus,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint>;

    /// Active endpoints of `tenant` subscribed to `event_type`.
    ///
    /// Must cost O(subscribed endpoints), not O(all endpoints).
    async fn list_active_for(
        &self,
        tenant: TenantId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookEndpoint>>;

    /// Persists new pending deliveries in one step.
    async fn insert_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> Result<()>;

    /// Finds a delivery within `tenant`.
    async fn find_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>>;

    /// Deliveries to one endpoint, most recent first.
    async fn list_deliveries(
        &self,
        tenant: TenantId,
        endpoint: EndpointId,
        page: Pagination,
    ) -> Result<Vec<WebhookDelivery>>;

    /// Leases up to `limit` due deliveries across all tenants.
    ///
    /// A delivery is due when it is `pending`, or `retrying` with
    /// `next_retry_at <= now`, and no live lease covers it.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDelivery>>;

    /// Leases one delivery regardless of `next_retry_at`.
    ///
    /// Fails with `DeliveryFinalized` for terminal deliveries and
    /// `ClaimConflict` while another lease is live.
    async fn claim_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimedDelivery>;

    /// Gives a lease back without recording an attempt.
    async fn release_claim(&self, claim: &ClaimedDelivery) -> Result<()>;

    /// Records an attempt and its transition, and rolls the result into the
    /// endpoint.
    ///
    /// In one atomic step: updates the delivery; on success resets the
    /// endpoint's failure count; on terminal failure increments it and
    /// trips `active -> failed` when it reaches `failure_threshold`.
    /// Suspensions leave the failure count alone. Fails with
    /// `DeliveryFinalized` if the delivery is already terminal and
    /// `ClaimConflict` if `claim` no longer holds the lease.
    async fn record_attempt(
        &self,
        claim: &ClaimedDelivery,
        record: AttemptRecord,
        failure_threshold: u32,
    ) -> Result<AttemptApplied>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}
