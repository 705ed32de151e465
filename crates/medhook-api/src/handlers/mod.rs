//! HTTP request handlers for the medhook API.
//!
//! Handlers are grouped by resource:
//! - `endpoints` - endpoint registration, status and test events
//! - `deliveries` - delivery history and forced re-attempts
//! - `events` - event submission
//! - `health` - liveness with engine counters
//!
//! Tenant-scoped handlers receive the caller's [`medhook_core::TenantId`] as
//! a request extension set by the tenant middleware. Failures render through
//! [`crate::ApiError`].

use std::str::FromStr;

use medhook_core::CoreError;

use crate::error::ApiError;

pub mod deliveries;
pub mod endpoints;
pub mod events;
pub mod health;

pub use deliveries::{get_delivery, list_endpoint_deliveries, retry_delivery};
pub use endpoints::{
    create_endpoint, delete_endpoint, get_endpoint, list_endpoints, send_test_event,
    set_endpoint_status, update_endpoint,
};
pub use events::submit_event;
pub use health::health_check;

/// Parses a path identifier. Anything that is not a UUID cannot name an
/// existing entity, so it reads as not found.
fn parse_id<T: FromStr>(entity: &'static str, raw: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| ApiError::Core(CoreError::not_found(entity, raw)))
}
