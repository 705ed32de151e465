//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook endpoints, deliveries, their status machines, and newtype
//! ID wrappers for compile-time type safety. Identifiers carry their own
//! sqlx encoding so repositories can bind them directly.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Ownership scope supplied by the caller. Every registry and ledger
    /// query is filtered by it.
    TenantId
}

uuid_id! {
    /// Identifies a registered webhook destination.
    EndpointId
}

uuid_id! {
    /// Identifies a domain event. Receivers use it as their idempotency key,
    /// since delivery is at-least-once.
    EventId
}

uuid_id! {
    /// Identifies one event-to-endpoint delivery lifecycle.
    DeliveryId
}

/// Reserved event type used by synthetic test deliveries.
pub const TEST_EVENT_TYPE: &str = "webhook.test";

const MAX_EVENT_TYPE_LEN: usize = 100;

/// Validated event type name such as `billing.created`.
///
/// Names are lowercase ASCII letters, digits and underscores, in one or more
/// dot-separated segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    /// Parses and validates an event type name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` on `eventType` if the name is empty,
    /// too long, or contains characters outside `[a-z0-9_.]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(CoreError::validation("eventType", "must not be empty"));
        }
        if name.len() > MAX_EVENT_TYPE_LEN {
            return Err(CoreError::validation(
                "eventType",
                format!("must be at most {MAX_EVENT_TYPE_LEN} characters"),
            ));
        }
        let well_formed = name.split('.').all(|segment| {
            !segment.is_empty()
                && segment.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
        if !well_formed {
            return Err(CoreError::validation(
                "eventType",
                format!("`{name}` must be dot-separated lowercase segments"),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// The reserved `webhook.test` type.
    pub fn test() -> Self {
        Self(TEST_EVENT_TYPE.to_string())
    }

    /// Whether this is the reserved test type.
    pub fn is_reserved(&self) -> bool {
        self.0 == TEST_EVENT_TYPE
    }

    /// Returns the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a name read back from storage, where it was validated on write.
    pub(crate) fn from_stored(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EventType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

/// Endpoint lifecycle status.
///
/// ```text
/// active <-> inactive     (manual)
/// active <-> paused       (manual)
/// active  -> failed       (health monitor only)
/// failed  -> active       (manual reactivation, resets failure_count)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Receives deliveries.
    Active,
    /// Switched off by an operator.
    Inactive,
    /// Temporarily held by an operator.
    Paused,
    /// Tripped by the health monitor after sustained failure.
    Failed,
}

impl EndpointStatus {
    /// Returns the storage and wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    /// Whether an operator may move an endpoint from `self` to `to`.
    ///
    /// `failed` is never a manual target.
    pub const fn allows_manual_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Inactive)
                | (Self::Inactive, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Failed, Self::Active)
        )
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::validation("status", format!("unknown status `{other}`"))),
        }
    }
}

/// Delivery lifecycle status. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Created, first attempt not yet made.
    Pending,
    /// A failed attempt is waiting for `next_retry_at`.
    Retrying,
    /// Receiver acknowledged with a 2xx.
    Success,
    /// Retries exhausted, or the endpoint was suspended.
    Failed,
}

impl DeliveryStatus {
    /// Returns the storage and wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition may happen.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => {
                Err(CoreError::Storage(format!("invalid delivery status in storage: {other}")))
            },
        }
    }
}

/// A tenant-registered HTTP destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    /// Unique identifier.
    pub id: EndpointId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Display name.
    pub name: String,
    /// Optional display description.
    pub description: Option<String>,
    /// Absolute `http`/`https` destination.
    pub url: String,
    /// Subscribed event types, sorted and never empty.
    pub event_types: Vec<EventType>,
    /// Lifecycle status.
    pub status: EndpointStatus,
    /// Per-attempt HTTP timeout, in [5, 120].
    pub timeout_seconds: u32,
    /// Additional attempts after the first, in [0, 5].
    pub retry_count: u32,
    /// Consecutive terminal failures since the last success.
    pub failure_count: u32,
    /// HMAC-SHA256 signing secret shared with the receiver.
    pub secret: String,
    /// When an attempt last completed for this endpoint.
    pub last_delivery_at: Option<DateTime<Utc>>,
    /// Delivery status left by that attempt.
    pub last_delivery_status: Option<DeliveryStatus>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last configuration or status change.
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Builds a freshly registered, active endpoint.
    pub fn new(
        tenant_id: TenantId,
        input: crate::validation::NewEndpoint,
        secret: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EndpointId::new(),
            tenant_id,
            name: input.name,
            description: input.description,
            url: input.url,
            event_types: input.event_types,
            status: EndpointStatus::Active,
            timeout_seconds: input.timeout_seconds,
            retry_count: input.retry_count,
            failure_count: 0,
            secret,
            last_delivery_at: None,
            last_delivery_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the matcher and scheduler may dispatch to this endpoint.
    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }

    /// Per-attempt timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    /// Maximum number of HTTP calls any one delivery may make.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Applies a validated configuration patch.
    pub fn apply_changes(
        &mut self,
        changes: crate::validation::EndpointChanges,
        now: DateTime<Utc>,
    ) {
        if let Some(name) = changes.name {
            self.name = name;
        }
        if let Some(description) = changes.description {
            self.description = description;
        }
        if let Some(url) = changes.url {
            self.url = url;
        }
        if let Some(event_types) = changes.event_types {
            self.event_types = event_types;
        }
        if let Some(timeout_seconds) = changes.timeout_seconds {
            self.timeout_seconds = timeout_seconds;
        }
        if let Some(retry_count) = changes.retry_count {
            self.retry_count = retry_count;
        }
        self.updated_at = now;
    }

    /// Applies an operator-requested status change.
    ///
    /// Requesting the current status is a no-op. Reactivating a `failed`
    /// endpoint clears its failure count.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidStatusTransition` for transitions the
    /// state machine does not allow, including any manual move to `failed`.
    pub fn apply_manual_status(&mut self, to: EndpointStatus, now: DateTime<Utc>) -> Result<()> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.allows_manual_transition(to) {
            return Err(CoreError::InvalidStatusTransition { from: self.status, to });
        }
        if self.status == EndpointStatus::Failed {
            self.failure_count = 0;
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Rolls a successful delivery into the endpoint.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.failure_count = 0;
        self.last_delivery_at = Some(at);
        self.last_delivery_status = Some(DeliveryStatus::Success);
        self.updated_at = at;
    }

    /// Rolls a retry-scheduled attempt into the endpoint.
    pub fn record_retry(&mut self, at: DateTime<Utc>) {
        self.last_delivery_at = Some(at);
        self.last_delivery_status = Some(DeliveryStatus::Retrying);
        self.updated_at = at;
    }

    /// Rolls a terminal failure into the endpoint and trips it when the
    /// consecutive-failure count reaches `threshold`.
    ///
    /// Returns `true` if this call moved the endpoint `active -> failed`.
    /// Callers must hold the endpoint exclusively so the increment and the
    /// trip are observed together.
    pub fn record_terminal_failure(&mut self, threshold: u32, at: DateTime<Utc>) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_delivery_at = Some(at);
        self.last_delivery_status = Some(DeliveryStatus::Failed);
        self.updated_at = at;

        if self.status == EndpointStatus::Active && self.failure_count >= threshold {
            self.status = EndpointStatus::Failed;
            return true;
        }
        false
    }
}

/// The lifecycle record of one event sent to one endpoint.
///
/// A single mutable row: the response fields describe the most recent
/// attempt only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    /// Unique identifier.
    pub id: DeliveryId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The domain event this delivery carries.
    pub event_id: EventId,
    /// Target endpoint.
    pub endpoint_id: EndpointId,
    /// Event type, copied from the event.
    pub event_type: EventType,
    /// Lifecycle status.
    pub status: DeliveryStatus,
    /// Ordinal of the current or next HTTP call, starting at 1. At a terminal
    /// status it equals the number of calls made.
    pub attempt: u32,
    /// Status code of the last response, if any.
    pub http_status: Option<u16>,
    /// Duration of the last attempt in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: Option<u64>,
    /// Truncated body of the last response.
    pub response_body: Option<String>,
    /// Truncated headers of the last response.
    pub response_headers: Option<BTreeMap<String, String>>,
    /// Failure description of the last attempt.
    pub error_message: Option<String>,
    /// Exact JSON text sent on the wire.
    pub payload: String,
    /// Earliest time of the next attempt while `retrying`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Acknowledgement time, set only on success.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// Creates a pending delivery of `envelope` to `endpoint`.
    pub fn pending(
        envelope: &EventEnvelope,
        endpoint: &WebhookEndpoint,
        payload: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            tenant_id: envelope.tenant_id,
            event_id: envelope.event_id,
            endpoint_id: endpoint.id,
            event_type: envelope.event_type.clone(),
            status: DeliveryStatus::Pending,
            attempt: 1,
            http_status: None,
            duration_ms: None,
            response_body: None,
            response_headers: None,
            error_message: None,
            payload,
            next_retry_at: None,
            created_at: now,
            delivered_at: None,
        }
    }

    /// The instant from which the scheduler may pick this delivery up.
    pub fn due_at(&self) -> DateTime<Utc> {
        match self.status {
            DeliveryStatus::Retrying => self.next_retry_at.unwrap_or(self.created_at),
            _ => self.created_at,
        }
    }

    /// Applies an attempt outcome. The caller has already checked that the
    /// delivery is not terminal.
    pub fn apply_attempt(&mut self, record: &AttemptRecord) {
        let capture = &record.capture;
        if record.transition == AttemptTransition::Exhausted {
            // No call was made: keep the last response, roll back the attempt
            // number that was reserved for it.
            self.status = DeliveryStatus::Failed;
            self.attempt = self.attempt.saturating_sub(1).max(1);
            self.next_retry_at = None;
            self.error_message.clone_from(&capture.error_message);
            return;
        }

        self.http_status = capture.http_status;
        self.duration_ms = capture.duration_ms;
        self.response_body.clone_from(&capture.response_body);
        self.response_headers.clone_from(&capture.response_headers);
        self.error_message.clone_from(&capture.error_message);

        match record.transition {
            AttemptTransition::Succeeded => {
                self.status = DeliveryStatus::Success;
                self.delivered_at = Some(capture.attempted_at);
                self.next_retry_at = None;
            },
            AttemptTransition::Retrying { next_retry_at } => {
                self.status = DeliveryStatus::Retrying;
                self.attempt += 1;
                self.next_retry_at = Some(next_retry_at);
            },
            AttemptTransition::Failed
            | AttemptTransition::Exhausted
            | AttemptTransition::Suspended => {
                self.status = DeliveryStatus::Failed;
                self.next_retry_at = None;
            },
        }
    }
}

/// Wire body of an event, serialized once at intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Event identifier, usable by receivers for deduplication.
    pub event_id: EventId,
    /// Event type.
    pub event_type: EventType,
    /// Intake time.
    pub created_at: DateTime<Utc>,
    /// Originating tenant.
    pub tenant_id: TenantId,
    /// Business payload.
    pub data: serde_json::Value,
}

/// What one HTTP attempt observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptCapture {
    /// Response status, if a response arrived.
    pub http_status: Option<u16>,
    /// Wall time of the attempt in milliseconds.
    pub duration_ms: Option<u64>,
    /// Truncated response body.
    pub response_body: Option<String>,
    /// Truncated response headers.
    pub response_headers: Option<BTreeMap<String, String>>,
    /// Failure description, `None` on success.
    pub error_message: Option<String>,
    /// When the attempt completed.
    pub attempted_at: DateTime<Utc>,
}

/// State change decided for a delivery after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptTransition {
    /// 2xx received. Terminal success, endpoint failure count reset.
    Succeeded,
    /// Failed, retry scheduled at `next_retry_at`.
    Retrying {
        /// Earliest time of the next attempt
        next_retry_at: DateTime<Utc>,
    },
    /// Failed with retries exhausted. Counts toward the endpoint's
    /// consecutive-failure threshold.
    Failed,
    /// The endpoint's retry budget shrank below the scheduled attempt, so
    /// the delivery fails without another call. Counts like `Failed`.
    Exhausted,
    /// Endpoint was missing or not active. Terminal, but not counted
    /// against the endpoint.
    Suspended,
}

/// An attempt capture plus the transition it triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// What was observed.
    pub capture: AttemptCapture,
    /// What happens next.
    pub transition: AttemptTransition,
}

/// Result of persisting an attempt.
#[derive(Debug, Clone)]
pub struct AttemptApplied {
    /// The delivery after the update.
    pub delivery: WebhookDelivery,
    /// The endpoint after its rollup, if it still exists.
    pub endpoint: Option<WebhookEndpoint>,
    /// Whether this attempt tripped the endpoint to `failed`.
    pub endpoint_tripped: bool,
}

/// Offset pagination for delivery listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page size, between 1 and [`Pagination::MAX_LIMIT`].
    pub limit: u32,
    /// Number of rows skipped.
    pub offset: u32,
}

impl Pagination {
    /// Default page size.
    pub const DEFAULT_LIMIT: u32 = 20;
    /// Largest page size served.
    pub const MAX_LIMIT: u32 = 100;

    /// Builds a page request, clamping the limit into range.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        Self { limit, offset: offset.unwrap_or(0) }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::NewEndpoint;

    fn endpoint(status: EndpointStatus) -> WebhookEndpoint {
        let input = NewEndpoint {
            name: "pharmacy".into(),
            description: None,
            url: "https://example.com/hooks".into(),
            event_types: vec![EventType::parse("billing.created").unwrap()],
            timeout_seconds: 30,
            retry_count: 3,
        };
        let mut endpoint =
            WebhookEndpoint::new(TenantId::new(), input, "whsec_x".into(), Utc::now());
        endpoint.status = status;
        endpoint
    }

    #[test]
    fn event_type_parsing() {
        assert!(EventType::parse("billing.created").is_ok());
        assert!(EventType::parse("lab.result_ready").is_ok());
        assert!(EventType::parse("").is_err());
        assert!(EventType::parse("Billing.Created").is_err());
        assert!(EventType::parse("billing..created").is_err());
        assert!(EventType::parse(".billing").is_err());
        assert!(EventType::test().is_reserved());
    }

    #[test]
    fn manual_transitions_follow_state_machine() {
        use EndpointStatus::*;

        assert!(Active.allows_manual_transition(Inactive));
        assert!(Inactive.allows_manual_transition(Active));
        assert!(Active.allows_manual_transition(Paused));
        assert!(Paused.allows_manual_transition(Active));
        assert!(Failed.allows_manual_transition(Active));

        assert!(!Active.allows_manual_transition(Failed));
        assert!(!Paused.allows_manual_transition(Inactive));
        assert!(!Inactive.allows_manual_transition(Paused));
        assert!(!Failed.allows_manual_transition(Paused));
    }

    #[test]
    fn reactivation_resets_failure_count() {
        let mut ep = endpoint(EndpointStatus::Failed);
        ep.failure_count = 10;

        ep.apply_manual_status(EndpointStatus::Active, Utc::now()).unwrap();

        assert_eq!(ep.status, EndpointStatus::Active);
        assert_eq!(ep.failure_count, 0);
    }

    #[test]
    fn pause_keeps_failure_count() {
        let mut ep = endpoint(EndpointStatus::Active);
        ep.failure_count = 4;

        ep.apply_manual_status(EndpointStatus::Paused, Utc::now()).unwrap();

        assert_eq!(ep.failure_count, 4);
    }

    #[test]
    fn failed_is_not_a_manual_target() {
        let mut ep = endpoint(EndpointStatus::Active);

        let err = ep.apply_manual_status(EndpointStatus::Failed, Utc::now()).unwrap_err();

        assert!(matches!(err, CoreError::InvalidStatusTransition { .. }));
        assert_eq!(ep.status, EndpointStatus::Active);
    }

    #[test]
    fn terminal_failure_trips_at_threshold() {
        let mut ep = endpoint(EndpointStatus::Active);
        let now = Utc::now();

        for _ in 0..2 {
            assert!(!ep.record_terminal_failure(3, now));
        }
        assert!(ep.record_terminal_failure(3, now));
        assert_eq!(ep.status, EndpointStatus::Failed);
        assert_eq!(ep.failure_count, 3);

        // Already failed: counts keep rising but no second trip.
        assert!(!ep.record_terminal_failure(3, now));
    }

    #[test]
    fn paused_endpoint_never_trips() {
        let mut ep = endpoint(EndpointStatus::Paused);

        assert!(!ep.record_terminal_failure(1, Utc::now()));
        assert_eq!(ep.status, EndpointStatus::Paused);
    }

    #[test]
    fn pagination_clamps_limit() {
        assert_eq!(Pagination::new(None, None).limit, 20);
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
        assert_eq!(Pagination::new(Some(1000), Some(5)), Pagination { limit: 100, offset: 5 });
    }
}
