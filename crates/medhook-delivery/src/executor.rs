//! Delivery executor: one HTTP attempt per claimed delivery.
//!
//! For each claim the executor re-reads the endpoint, signs and sends the
//! stored payload, classifies the outcome, asks the retry policy what comes
//! next and writes the result back under the claim. The write-back also rolls
//! the outcome into the endpoint's health.

use std::sync::Arc;

use bytes::Bytes;
use medhook_core::{
    AttemptApplied, AttemptCapture, AttemptRecord, AttemptTransition, ClaimedDelivery, Clock,
    CoreError, DeliveryStatus, Result, WebhookEndpoint, WebhookStore,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryResponse, OutboundRequest, WebhookTransport},
    engine::EngineStats,
    error::DeliveryError,
    health::HealthMonitor,
    ledger::DeliveryLedger,
    retry::{RetryDecision, RetryPolicy},
    signing,
};

/// Runs delivery attempts.
pub struct DeliveryExecutor {
    store: Arc<dyn WebhookStore>,
    ledger: DeliveryLedger,
    transport: Arc<dyn WebhookTransport>,
    retry_policy: RetryPolicy,
    health: Arc<HealthMonitor>,
    stats: Arc<RwLock<EngineStats>>,
    clock: Arc<dyn Clock>,
}

impl DeliveryExecutor {
    /// Creates an executor.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        transport: Arc<dyn WebhookTransport>,
        retry_policy: RetryPolicy,
        health: Arc<HealthMonitor>,
        stats: Arc<RwLock<EngineStats>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = DeliveryLedger::new(store.clone());
        Self { store, ledger, transport, retry_policy, health, stats, clock }
    }

    /// Runs a claim to completion, logging instead of returning errors.
    ///
    /// Used by workers. A write-back that lost its claim is discarded: the
    /// delivery has already been re-claimed elsewhere.
    pub async fn process(&self, claim: ClaimedDelivery) {
        let delivery_id = claim.delivery.id;
        match self.execute(&claim).await {
            Ok(_) => {},
            Err(CoreError::ClaimConflict { .. }) => {
                warn!(%delivery_id, "claim lost before write-back; attempt result discarded");
            },
            Err(CoreError::DeliveryFinalized { status, .. }) => {
                debug!(
                    %delivery_id,
                    %status,
                    "delivery finalized elsewhere; attempt result discarded"
                );
            },
            Err(error) => {
                error!(%delivery_id, error = %error, "delivery attempt could not be recorded");
                if let Err(release_error) = self.ledger.release(&claim).await {
                    warn!(%delivery_id, error = %release_error, "failed to release claim");
                }
            },
        }
    }

    /// Performs one attempt for `claim` and records it.
    ///
    /// A delivery whose endpoint is gone or not `active` is suspended
    /// without any HTTP call.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ClaimConflict` or `CoreError::DeliveryFinalized`
    /// if the write-back is rejected, and storage errors as they occur.
    pub async fn execute(&self, claim: &ClaimedDelivery) -> Result<AttemptApplied> {
        let delivery = &claim.delivery;
        let endpoint =
            match self.store.find_endpoint(delivery.tenant_id, delivery.endpoint_id).await? {
                Some(endpoint) if endpoint.is_active() => endpoint,
                Some(endpoint) => {
                    return self.suspend(claim, format!("endpoint is {}", endpoint.status)).await;
                },
                None => return self.suspend(claim, "endpoint no longer exists").await,
            };

        if delivery.attempt > endpoint.max_attempts() {
            return self.exhaust(claim, &endpoint).await;
        }

        self.stats.write().await.in_flight_deliveries += 1;
        let result = self.attempt(claim, &endpoint).await;
        let mut stats = self.stats.write().await;
        stats.in_flight_deliveries = stats.in_flight_deliveries.saturating_sub(1);
        if let Ok(applied) = &result {
            stats.record(applied);
        }
        drop(stats);

        result
    }

    /// Terminally fails a claimed delivery because its endpoint cannot
    /// receive. Does not count against the endpoint's failure threshold.
    pub async fn suspend(
        &self,
        claim: &ClaimedDelivery,
        reason: impl Into<String>,
    ) -> Result<AttemptApplied> {
        let error = DeliveryError::suspended(reason);
        let record = AttemptRecord {
            capture: AttemptCapture {
                error_message: Some(error.to_string()),
                attempted_at: self.clock.now_utc(),
                ..AttemptCapture::default()
            },
            transition: AttemptTransition::Suspended,
        };

        let applied = self.ledger.record(claim, record, self.health.threshold()).await?;
        self.stats.write().await.suspended_deliveries += 1;

        info!(
            tenant_id = %claim.delivery.tenant_id,
            endpoint_id = %claim.delivery.endpoint_id,
            delivery_id = %claim.delivery.id,
            reason = %error,
            "delivery suspended"
        );
        Ok(applied)
    }

    /// Fails a delivery whose scheduled attempt no longer fits the
    /// endpoint's `retry_count`. No HTTP call is made.
    async fn exhaust(
        &self,
        claim: &ClaimedDelivery,
        endpoint: &WebhookEndpoint,
    ) -> Result<AttemptApplied> {
        let reason = format!(
            "retries exhausted: endpoint allows {} attempts, {} already made",
            endpoint.max_attempts(),
            claim.delivery.attempt.saturating_sub(1)
        );
        let record = AttemptRecord {
            capture: AttemptCapture {
                error_message: Some(reason),
                attempted_at: self.clock.now_utc(),
                ..AttemptCapture::default()
            },
            transition: AttemptTransition::Exhausted,
        };

        let applied = self.ledger.record(claim, record, self.health.threshold()).await?;
        self.health.observe(&applied);

        let mut stats = self.stats.write().await;
        stats.failed_deliveries += 1;
        if applied.endpoint_tripped {
            stats.endpoints_tripped += 1;
        }
        drop(stats);

        log_attempt(&applied, None);
        Ok(applied)
    }

    async fn attempt(
        &self,
        claim: &ClaimedDelivery,
        endpoint: &WebhookEndpoint,
    ) -> Result<AttemptApplied> {
        let delivery = &claim.delivery;
        let started = self.clock.now();

        let outcome = match signing::sign(&endpoint.secret, delivery.payload.as_bytes()) {
            Ok(signature) => {
                let request = OutboundRequest {
                    delivery_id: delivery.id,
                    event_id: delivery.event_id,
                    event_type: delivery.event_type.clone(),
                    url: endpoint.url.clone(),
                    body: Bytes::from(delivery.payload.clone()),
                    attempt: delivery.attempt,
                    timeout: endpoint.timeout(),
                    signature,
                    timestamp: self.clock.now_utc(),
                };
                self.transport.send(request).await
            },
            Err(error) => Err(error),
        };

        let duration = self.clock.now().saturating_duration_since(started);
        let attempted_at = self.clock.now_utc();
        let (capture, failure) = capture_outcome(outcome, duration, attempted_at);

        let transition = match &failure {
            None => AttemptTransition::Succeeded,
            Some(error) if error.is_retryable() => {
                match self.retry_policy.decide(delivery.attempt, endpoint.retry_count, attempted_at)
                {
                    RetryDecision::Retry { next_attempt_at } => {
                        AttemptTransition::Retrying { next_retry_at: next_attempt_at }
                    },
                    RetryDecision::GiveUp { reason } => {
                        debug!(delivery_id = %delivery.id, %reason, "giving up on delivery");
                        AttemptTransition::Failed
                    },
                }
            },
            Some(_) => AttemptTransition::Failed,
        };

        let applied = self
            .ledger
            .record(claim, AttemptRecord { capture, transition }, self.health.threshold())
            .await?;
        self.health.observe(&applied);

        log_attempt(&applied, failure.as_ref());
        Ok(applied)
    }
}

/// Splits a transport outcome into what gets stored and the failure, if any.
fn capture_outcome(
    outcome: std::result::Result<DeliveryResponse, DeliveryError>,
    duration: std::time::Duration,
    attempted_at: chrono::DateTime<chrono::Utc>,
) -> (AttemptCapture, Option<DeliveryError>) {
    let duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));

    match outcome {
        Ok(response) => {
            let failure =
                (!response.is_success()).then(|| DeliveryError::from_status(response.status_code));
            let capture = AttemptCapture {
                http_status: Some(response.status_code),
                duration_ms,
                response_body: Some(response.body),
                response_headers: Some(response.headers),
                error_message: failure.as_ref().map(ToString::to_string),
                attempted_at,
            };
            (capture, failure)
        },
        Err(error) => {
            let capture = AttemptCapture {
                duration_ms,
                error_message: Some(error.to_string()),
                attempted_at,
                ..AttemptCapture::default()
            };
            (capture, Some(error))
        },
    }
}

fn log_attempt(applied: &AttemptApplied, failure: Option<&DeliveryError>) {
    let delivery = &applied.delivery;
    match (delivery.status, failure) {
        (DeliveryStatus::Success, _) => info!(
            tenant_id = %delivery.tenant_id,
            endpoint_id = %delivery.endpoint_id,
            delivery_id = %delivery.id,
            attempt = delivery.attempt,
            status_code = delivery.http_status,
            "delivery succeeded"
        ),
        (DeliveryStatus::Retrying, Some(error)) => warn!(
            tenant_id = %delivery.tenant_id,
            endpoint_id = %delivery.endpoint_id,
            delivery_id = %delivery.id,
            next_attempt = delivery.attempt,
            next_retry_at = ?delivery.next_retry_at,
            class = %error.class(),
            error = %error,
            "delivery attempt failed; retry scheduled"
        ),
        (_, failure) => warn!(
            tenant_id = %delivery.tenant_id,
            endpoint_id = %delivery.endpoint_id,
            delivery_id = %delivery.id,
            attempt = delivery.attempt,
            error = failure.map(tracing::field::display),
            "delivery failed permanently"
        ),
    }
}
