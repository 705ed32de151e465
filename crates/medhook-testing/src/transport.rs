//! Scripted transport standing in for real receivers.
//!
//! Outcomes are consumed in order; once the script runs out every attempt
//! gets the fallback outcome. Every request is recorded for inspection.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use medhook_delivery::{DeliveryError, DeliveryResponse, OutboundRequest, WebhookTransport};
use tokio::sync::Mutex;

/// What the fake receiver does with one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Answer with this status and an empty body.
    Status(u16),
    /// Answer with this status and body.
    StatusWithBody(u16, String),
    /// Never answer within the attempt's timeout.
    Timeout,
    /// Refuse the connection.
    ConnectionRefused,
}

/// In-process [`WebhookTransport`] driven by a script.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: Mutex<ScriptedOutcome>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    /// Transport answering 200 unless scripted otherwise.
    pub fn new() -> Self {
        Self::with_fallback(ScriptedOutcome::Status(200))
    }

    /// Transport answering `fallback` once the script is exhausted.
    pub fn with_fallback(fallback: ScriptedOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues outcomes for the next attempts.
    pub async fn push<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = ScriptedOutcome>,
    {
        self.script.lock().await.extend(outcomes);
    }

    /// Changes the outcome used once the script is exhausted.
    pub async fn set_fallback(&self, outcome: ScriptedOutcome) {
        *self.fallback.lock().await = outcome;
    }

    /// Requests received so far, in order.
    pub async fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn next_outcome(&self) -> ScriptedOutcome {
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.lock().await.clone(),
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryResponse, DeliveryError> {
        let timeout_seconds = request.timeout.as_secs();
        self.requests.lock().await.push(request);

        let (status_code, body) = match self.next_outcome().await {
            ScriptedOutcome::Status(status_code) => (status_code, String::new()),
            ScriptedOutcome::StatusWithBody(status_code, body) => (status_code, body),
            ScriptedOutcome::Timeout => return Err(DeliveryError::timeout(timeout_seconds)),
            ScriptedOutcome::ConnectionRefused => {
                return Err(DeliveryError::network("connection refused"));
            },
        };

        Ok(DeliveryResponse { status_code, headers: BTreeMap::new(), body })
    }
}
