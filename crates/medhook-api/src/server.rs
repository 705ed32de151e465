//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Tenant scoping (`/v1` routes only)
//! 5. Handler execution

use std::{future::Future, net::SocketAddr};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, middleware::tenant_middleware, AppState};

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use medhook_api::{create_router, AppState};
///
/// fn app(state: AppState) -> axum::Router {
///     create_router(state)
/// }
/// ```
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout;

    let api_routes = Router::new()
        .route("/endpoints", post(handlers::create_endpoint).get(handlers::list_endpoints))
        .route(
            "/endpoints/{id}",
            get(handlers::get_endpoint)
                .patch(handlers::update_endpoint)
                .delete(handlers::delete_endpoint),
        )
        .route("/endpoints/{id}/status", put(handlers::set_endpoint_status))
        .route("/endpoints/{id}/test", post(handlers::send_test_event))
        .route("/endpoints/{id}/deliveries", get(handlers::list_endpoint_deliveries))
        .route("/deliveries/{id}", get(handlers::get_delivery))
        .route("/deliveries/{id}/retry", post(handlers::retry_delivery))
        .route("/events", post(handlers::submit_event))
        .layer(middleware::from_fn(tenant_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the API on `addr` until `shutdown` resolves, then drains in-flight
/// requests.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or serving fails.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(addr = %actual_addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}
