//! Delivery ledger handlers.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use medhook_core::{DeliveryId, EndpointId, Pagination, TenantId, WebhookDelivery};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::parse_id;
use crate::{error::ApiError, AppState};

/// Paging parameters for delivery listings.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Page size, clamped to [1, 100], default 20.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

/// One page of deliveries, newest first.
#[derive(Debug, Serialize)]
pub struct DeliveryPage {
    /// Deliveries on this page.
    pub deliveries: Vec<WebhookDelivery>,
    /// Effective page size.
    pub limit: u32,
    /// Rows skipped.
    pub offset: u32,
}

/// Lists deliveries for an endpoint.
#[instrument(name = "list_deliveries", skip(state), fields(tenant_id = %tenant))]
pub async fn list_endpoint_deliveries(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<DeliveryPage>, ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    let page = Pagination::new(query.limit, query.offset);
    let deliveries = state.engine.list_deliveries(tenant, id, page).await?;

    Ok(Json(DeliveryPage { deliveries, limit: page.limit, offset: page.offset }))
}

/// Fetches one delivery.
#[instrument(name = "get_delivery", skip(state), fields(tenant_id = %tenant))]
pub async fn get_delivery(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<Json<WebhookDelivery>, ApiError> {
    let id: DeliveryId = parse_id("delivery", &id)?;
    Ok(Json(state.engine.get_delivery(tenant, id).await?))
}

/// Attempts a non-terminal delivery immediately.
#[instrument(name = "retry_delivery", skip(state), fields(tenant_id = %tenant))]
pub async fn retry_delivery(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<Json<WebhookDelivery>, ApiError> {
    let id: DeliveryId = parse_id("delivery", &id)?;
    let delivery = state.engine.redeliver_now(tenant, id).await?;

    info!(delivery_id = %id, status = %delivery.status, "forced re-attempt finished");
    Ok(Json(delivery))
}
