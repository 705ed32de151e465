//! medhook HTTP API.
//!
//! Exposes the delivery engine's tenant-scoped operations over JSON/HTTP and
//! owns the service configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{sync::Arc, time::Duration};

use medhook_core::Clock;
use medhook_delivery::DeliveryEngine;

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ErrorDetail, ErrorResponse};
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The delivery engine behind every operation.
    pub engine: Arc<DeliveryEngine>,
    /// Clock for response timestamps.
    pub clock: Arc<dyn Clock>,
    /// Per-request timeout enforced by the router.
    pub request_timeout: Duration,
}

impl AppState {
    /// Creates state with a 150 second request timeout, longer than any
    /// endpoint's attempt timeout.
    pub fn new(engine: Arc<DeliveryEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock, request_timeout: Duration::from_secs(150) }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}
