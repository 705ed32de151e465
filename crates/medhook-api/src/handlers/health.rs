//! Health check handler for service monitoring.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use medhook_core::Clock;
use medhook_delivery::{DeliveryEngine, EngineStats};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Store reachability
    pub store: ComponentHealth,
    /// Whether the background delivery runtime is running
    pub delivery_running: bool,
    /// Engine counters since startup
    pub stats: EngineStats,
    /// Service version
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Store reachable but deliveries are not being processed
    Degraded,
    /// Store unreachable
    Unhealthy,
}

/// Health of one component.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    /// Whether the component answered
    pub up: bool,
    /// Error message if it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Runs health checks against the engine with an injectable clock.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks the store and collects engine state.
    pub async fn health_check(&self, engine: &DeliveryEngine) -> HealthResponse {
        let timestamp = self.clock.now_utc();
        let start_time = self.clock.now();

        let store = match engine.ping().await {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "store health check failed");
                Some(e.to_string())
            },
        };
        let response_time_ms =
            u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        let delivery_running = engine.is_running().await;

        let status = match (&store, delivery_running) {
            (Some(_), _) => HealthStatus::Unhealthy,
            (None, false) => HealthStatus::Degraded,
            (None, true) => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            timestamp,
            store: ComponentHealth { up: store.is_none(), message: store, response_time_ms },
            delivery_running,
            stats: engine.stats().await,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint handler.
///
/// Answers 200 unless the store is unreachable.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthService::new(state.clock.clone()).health_check(&state.engine).await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "health check completed");
    (status_code, Json(response)).into_response()
}
