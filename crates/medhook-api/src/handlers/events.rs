//! Event submission handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use medhook_core::TenantId;
use medhook_delivery::SubmittedEvent;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::{error::ApiError, AppState};

/// Body of an event submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEventRequest {
    /// Catalog event type.
    pub event_type: String,
    /// Business payload, delivered verbatim.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Accepts an event and fans it out to subscribed endpoints. Responds 202;
/// delivery happens asynchronously.
#[instrument(name = "submit_event", skip(state, payload), fields(tenant_id = %tenant))]
pub async fn submit_event(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    payload: Result<Json<SubmitEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmittedEvent>), ApiError> {
    let Json(request) = payload?;
    let submitted = state.engine.submit_event(tenant, &request.event_type, request.data).await?;

    info!(
        event_id = %submitted.event_id,
        event_type = %request.event_type,
        deliveries = submitted.deliveries.len(),
        "event accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}
