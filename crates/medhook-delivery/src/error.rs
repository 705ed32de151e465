//! Error types for webhook delivery operations.
//!
//! Delivery-time failures are never returned to the event producer. They are
//! classified here, written onto the delivery row and logged. Registry and
//! ledger failures arrive wrapped as [`DeliveryError::Store`].

use std::fmt;

use medhook_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised while delivering a webhook.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Receiver did not answer within the endpoint's timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Timeout that elapsed
        timeout_seconds: u64,
    },

    /// Connection, DNS or TLS failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Receiver answered 5xx.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
    },

    /// Receiver answered 429.
    #[error("rate limited: HTTP {status_code}")]
    RateLimited {
        /// HTTP status code (429)
        status_code: u16,
    },

    /// Receiver answered 4xx other than 429.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
    },

    /// Receiver answered with a status outside 2xx, 4xx and 5xx.
    #[error("unexpected status: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// Endpoint URL was rejected when building the request.
    #[error("invalid endpoint URL: {message}")]
    InvalidUrl {
        /// Why the URL could not be used
        message: String,
    },

    /// Endpoint was missing or not active when the delivery came due.
    #[error("endpoint suspended: {reason}")]
    EndpointSuspended {
        /// Why the endpoint cannot receive deliveries
        reason: String,
    },

    /// Engine or HTTP client could not be configured.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Worker pool did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout_seconds}s")]
    ShutdownTimeout {
        /// Timeout that elapsed
        timeout_seconds: u64,
    },

    /// Registry or ledger operation failed.
    #[error(transparent)]
    Store(#[from] CoreError),
}

/// How a failure feeds the retry and health decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Might succeed later: timeouts, network errors, 429, 5xx.
    Transient,
    /// Will not succeed without a receiver-side change: other 4xx, bad URL.
    Permanent,
    /// Endpoint not able to receive. Never counted as a failure.
    Suspended,
    /// Failure inside the engine rather than at the receiver.
    Internal,
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a suspension error.
    pub fn suspended(reason: impl Into<String>) -> Self {
        Self::EndpointSuspended { reason: reason.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Maps a non-2xx response status onto its error.
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            429 => Self::RateLimited { status_code },
            400..=499 => Self::ClientError { status_code },
            500..=599 => Self::ServerError { status_code },
            _ => Self::UnexpectedStatus { status_code },
        }
    }

    /// Classifies the failure.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout { .. }
            | Self::Network { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::UnexpectedStatus { .. } => FailureClass::Transient,

            Self::ClientError { .. } | Self::InvalidUrl { .. } => FailureClass::Permanent,

            Self::EndpointSuspended { .. } => FailureClass::Suspended,

            Self::Configuration { .. } | Self::ShutdownTimeout { .. } | Self::Store(_) => {
                FailureClass::Internal
            },
        }
    }

    /// Whether the retry budget applies to this failure.
    ///
    /// Permanent receiver failures are retried like transient ones; only
    /// suspensions and engine-side errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Transient | FailureClass::Permanent)
    }

    /// Response status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ServerError { status_code }
            | Self::RateLimited { status_code }
            | Self::ClientError { status_code }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Suspended => write!(f, "suspended"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
