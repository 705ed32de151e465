//! Endpoint registration and lifecycle handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use medhook_core::{
    EndpointId, EndpointPatch, EndpointSpec, EndpointStatus, EventId, TenantId, WebhookEndpoint,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::parse_id;
use crate::{error::ApiError, AppState};

/// Body of a status change request.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// Requested status.
    pub status: EndpointStatus,
}

/// Response to a test event request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEventResponse {
    /// Identifier of the synthetic event.
    pub test_event_id: EventId,
}

/// Registers an endpoint. Responds 201 with the endpoint, secret included.
#[instrument(name = "create_endpoint", skip(state, payload), fields(tenant_id = %tenant))]
pub async fn create_endpoint(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    payload: Result<Json<EndpointSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<WebhookEndpoint>), ApiError> {
    let Json(spec) = payload?;
    let endpoint = state.engine.create_endpoint(tenant, spec).await?;

    info!(endpoint_id = %endpoint.id, "endpoint created");
    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// Lists the tenant's endpoints.
#[instrument(name = "list_endpoints", skip(state), fields(tenant_id = %tenant))]
pub async fn list_endpoints(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
) -> Result<Json<Vec<WebhookEndpoint>>, ApiError> {
    Ok(Json(state.engine.list_endpoints(tenant).await?))
}

/// Fetches one endpoint.
#[instrument(name = "get_endpoint", skip(state), fields(tenant_id = %tenant))]
pub async fn get_endpoint(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<Json<WebhookEndpoint>, ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    Ok(Json(state.engine.get_endpoint(tenant, id).await?))
}

/// Applies a partial update.
#[instrument(name = "update_endpoint", skip(state, payload), fields(tenant_id = %tenant))]
pub async fn update_endpoint(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
    payload: Result<Json<EndpointPatch>, JsonRejection>,
) -> Result<Json<WebhookEndpoint>, ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    let Json(patch) = payload?;
    let endpoint = state.engine.update_endpoint(tenant, id, patch).await?;

    info!(endpoint_id = %endpoint.id, "endpoint updated");
    Ok(Json(endpoint))
}

/// Deletes an endpoint. Its delivery history is kept.
#[instrument(name = "delete_endpoint", skip(state), fields(tenant_id = %tenant))]
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    state.engine.delete_endpoint(tenant, id).await?;

    info!(endpoint_id = %id, "endpoint deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Moves an endpoint to an operator-selectable status.
#[instrument(name = "set_endpoint_status", skip(state, payload), fields(tenant_id = %tenant))]
pub async fn set_endpoint_status(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<WebhookEndpoint>, ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    let Json(request) = payload?;
    let endpoint = state.engine.set_endpoint_status(tenant, id, request.status).await?;

    info!(endpoint_id = %id, status = %endpoint.status, "endpoint status set");
    Ok(Json(endpoint))
}

/// Queues a `webhook.test` delivery to one endpoint.
#[instrument(name = "send_test_event", skip(state), fields(tenant_id = %tenant))]
pub async fn send_test_event(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TestEventResponse>), ApiError> {
    let id: EndpointId = parse_id("endpoint", &id)?;
    let test_event_id = state.engine.send_test_event(tenant, id).await?;

    Ok((StatusCode::ACCEPTED, Json(TestEventResponse { test_event_id })))
}
