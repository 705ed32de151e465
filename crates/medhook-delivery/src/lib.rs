//! Webhook delivery engine for hospital operations events.
//!
//! This crate turns accepted domain events into signed HTTP callbacks to
//! tenant-registered endpoints, retries failures with exponential backoff,
//! keeps an auditable delivery ledger and takes persistently failing
//! endpoints out of service.
//!
//! # Architecture
//!
//! A scheduler task claims due deliveries from the store under a time-bounded
//! lease and feeds them to a pool of async workers. Each worker handles one
//! attempt end to end:
//!
//! 1. **Endpoint check** - suspend if the endpoint is gone or not active
//! 2. **HTTP delivery** - sign and POST the stored payload
//! 3. **Classification** - success, transient or permanent failure
//! 4. **Write-back** - record the attempt, schedule a retry or finalize, and
//!    roll the outcome into endpoint health
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use medhook_core::{storage::memory::MemoryStore, EventCatalog, RealClock};
//! use medhook_delivery::{DeliveryConfig, DeliveryEngine, DeliveryError};
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let engine = DeliveryEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     EventCatalog::default(),
//!     DeliveryConfig::default(),
//!     Arc::new(RealClock::new()),
//! )?;
//!
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod intake;
pub mod ledger;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod worker_pool;

pub use client::{ClientConfig, DeliveryClient, DeliveryResponse, OutboundRequest, WebhookTransport};
pub use engine::{DeliveryConfig, DeliveryEngine, EngineStats};
pub use error::{DeliveryError, FailureClass, Result};
pub use health::HealthMonitor;
pub use intake::{EventIntake, Matcher, SubmittedEvent};
pub use ledger::DeliveryLedger;
pub use registry::EndpointRegistry;
pub use retry::{RetryDecision, RetryPolicy};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of deliveries claimed per scheduler scan.
pub const DEFAULT_BATCH_SIZE: usize = 50;
