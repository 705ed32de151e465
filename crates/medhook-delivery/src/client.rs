//! HTTP transport for webhook delivery.
//!
//! [`WebhookTransport`] is the seam between the executor and the network.
//! [`DeliveryClient`] implements it on `reqwest`: one POST per attempt, no
//! redirects, a per-request timeout taken from the endpoint, and response
//! capture bounded for storage on the delivery row.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use medhook_core::{DeliveryId, EventId, EventType};
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use url::Url;

use crate::error::{DeliveryError, Result};

/// Header carrying the event identifier.
pub const HEADER_EVENT_ID: &str = "X-Medhook-Event-Id";
/// Header carrying the event type.
pub const HEADER_EVENT_TYPE: &str = "X-Medhook-Event-Type";
/// Header carrying the delivery identifier.
pub const HEADER_DELIVERY_ID: &str = "X-Medhook-Delivery-Id";
/// Header carrying the 1-based attempt ordinal.
pub const HEADER_DELIVERY_ATTEMPT: &str = "X-Medhook-Delivery-Attempt";
/// Header carrying the send time in RFC 3339.
pub const HEADER_TIMESTAMP: &str = "X-Medhook-Timestamp";
/// Header carrying `sha256=<hex>` of the body.
pub const HEADER_SIGNATURE: &str = "X-Medhook-Signature";

const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// User agent string for requests.
    pub user_agent: String,
    /// Bytes of response body kept on the delivery row.
    pub max_response_body_bytes: usize,
    /// Number of response headers kept on the delivery row.
    pub max_response_headers: usize,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Medhook-Webhook-Delivery/{}", env!("CARGO_PKG_VERSION")),
            max_response_body_bytes: 4096,
            max_response_headers: 32,
            verify_tls: true,
        }
    }
}

/// One outbound attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Delivery being attempted.
    pub delivery_id: DeliveryId,
    /// Event carried.
    pub event_id: EventId,
    /// Type of that event.
    pub event_type: EventType,
    /// Destination URL.
    pub url: String,
    /// Exact JSON body.
    pub body: Bytes,
    /// 1-based attempt ordinal.
    pub attempt: u32,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
    /// Value of the signature header.
    pub signature: String,
    /// Send time advertised to the receiver.
    pub timestamp: DateTime<Utc>,
}

/// What came back from a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, lowercased and truncated.
    pub headers: BTreeMap<String, String>,
    /// Response body, truncated.
    pub body: String,
}

impl DeliveryResponse {
    /// Whether the receiver acknowledged with a 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Sends webhook attempts.
///
/// Implementations return `Ok` for any HTTP response, including non-2xx,
/// and `Err` only when no response was obtained.
#[async_trait]
pub trait WebhookTransport: Send + Sync + 'static {
    /// Performs one attempt.
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryResponse>;
}

/// Production transport on a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    async fn read_response(&self, response: Response) -> DeliveryResponse {
        let status_code = response.status().as_u16();
        let headers = extract_headers(response.headers(), self.config.max_response_headers);

        let max_bytes = self.config.max_response_body_bytes;
        let body = match read_capped(response, max_bytes).await {
            Ok(bytes) => truncate_body(&bytes, max_bytes),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read response body");
                format!("[failed to read response body: {e}]")
            },
        };

        DeliveryResponse { status_code, headers, body }
    }
}

#[async_trait]
impl WebhookTransport for DeliveryClient {
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryResponse> {
        let span = info_span!(
            "webhook_delivery",
            event_id = %request.event_id,
            delivery_id = %request.delivery_id,
            event_type = %request.event_type,
            url = %request.url,
            attempt = request.attempt
        );

        async move {
            let url = Url::parse(&request.url)
                .map_err(|e| DeliveryError::InvalidUrl { message: e.to_string() })?;

            let http_request = self
                .client
                .post(url)
                .timeout(request.timeout)
                .header("content-type", "application/json")
                .header(HEADER_EVENT_ID, request.event_id.to_string())
                .header(HEADER_EVENT_TYPE, request.event_type.as_str())
                .header(HEADER_DELIVERY_ID, request.delivery_id.to_string())
                .header(HEADER_DELIVERY_ATTEMPT, request.attempt.to_string())
                .header(HEADER_TIMESTAMP, request.timestamp.to_rfc3339())
                .header(HEADER_SIGNATURE, &request.signature)
                .body(request.body);

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "request failed");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(request.timeout.as_secs()));
                    }
                    if e.is_builder() {
                        return Err(DeliveryError::InvalidUrl { message: e.to_string() });
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let delivery_response = self.read_response(response).await;

            if delivery_response.is_success() {
                tracing::debug!(status = delivery_response.status_code, "receiver acknowledged");
            } else {
                tracing::warn!(
                    status = delivery_response.status_code,
                    "receiver rejected delivery"
                );
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }
}

/// Reads a response body chunk by chunk, stopping one byte past
/// `max_bytes` so the caller can tell the body was cut.
async fn read_capped(mut response: Response, max_bytes: usize) -> reqwest::Result<Vec<u8>> {
    let limit = max_bytes.saturating_add(1);
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

/// Keeps at most `max_bytes` of a response body, marking the cut.
pub fn truncate_body(bytes: &[u8], max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let keep = max_bytes.saturating_sub(TRUNCATION_SUFFIX.len());
    let head = String::from_utf8_lossy(&bytes[..keep]);
    format!("{head}{TRUNCATION_SUFFIX}")
}

/// Extracts up to `limit` UTF-8 headers with lowercased names.
fn extract_headers(header_map: &HeaderMap, limit: usize) -> BTreeMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|value| (key.as_str().to_string(), value.to_string()))
        })
        .take(limit)
        .collect()
}
