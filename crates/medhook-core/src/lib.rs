//! Domain primitives for the medhook webhook delivery engine.
//!
//! Provides strongly-typed identifiers, the endpoint and delivery models with
//! their status machines, endpoint input validation, the event type catalog,
//! the clock abstraction, and the storage seam shared by the registry and
//! the delivery ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;
pub mod validation;

pub use catalog::EventCatalog;
pub use error::{CoreError, Result};
pub use models::{
    AttemptApplied, AttemptCapture, AttemptRecord, AttemptTransition, DeliveryId, DeliveryStatus,
    EndpointId, EndpointStatus, EventEnvelope, EventId, EventType, Pagination, TenantId,
    WebhookDelivery, WebhookEndpoint, TEST_EVENT_TYPE,
};
pub use storage::{ClaimToken, ClaimedDelivery, WebhookStore};
pub use time::{Clock, RealClock, TestClock};
pub use validation::{EndpointChanges, EndpointPatch, EndpointSpec, NewEndpoint};
