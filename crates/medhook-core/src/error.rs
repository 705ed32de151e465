//! Error types and result handling for registry and ledger operations.
//!
//! Every error carries a stable code so the HTTP boundary and operators can
//! tell failures apart without parsing messages. Delivery-time failures
//! (timeouts, non-2xx responses) live in the delivery crate and never surface
//! here; they are recorded on the delivery row instead.

use thiserror::Error;

use crate::models::{DeliveryId, DeliveryStatus, EndpointStatus};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the registry, intake and ledger.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Endpoint or event input rejected before anything was persisted (E1001).
    #[error("[E1001] Validation failed for `{field}`: {message}")]
    Validation {
        /// Name of the offending input field
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// Entity unknown within the caller's tenant (E1002).
    #[error("[E1002] Not found: {entity} {id}")]
    NotFound {
        /// Kind of entity looked up
        entity: &'static str,
        /// Identifier that was not found
        id: String,
    },

    /// Manual status change not permitted by the endpoint state machine
    /// (E1003).
    #[error("[E1003] Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current endpoint status
        from: EndpointStatus,
        /// Requested endpoint status
        to: EndpointStatus,
    },

    /// Delivery already reached a terminal status and can no longer change
    /// (E1004).
    #[error("[E1004] Delivery {id} is finalized with status {status}")]
    DeliveryFinalized {
        /// The finalized delivery
        id: DeliveryId,
        /// Its terminal status
        status: DeliveryStatus,
    },

    /// Another worker holds the claim on this delivery (E1005).
    #[error("[E1005] Delivery {id} is claimed by another worker")]
    ClaimConflict {
        /// The contested delivery
        id: DeliveryId,
    },

    /// Backing store failed (E3001).
    #[error("[E3001] Storage error: {0}")]
    Storage(String),

    /// Payload could not be encoded for the wire (E3002).
    #[error("[E3002] Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Creates a validation error naming the offending field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Creates a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Returns the stable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "E1001",
            Self::NotFound { .. } => "E1002",
            Self::InvalidStatusTransition { .. } => "E1003",
            Self::DeliveryFinalized { .. } => "E1004",
            Self::ClaimConflict { .. } => "E1005",
            Self::Storage(_) => "E3001",
            Self::Serialization(_) => "E3002",
        }
    }

    /// Returns the offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound { entity: "row", id: "unknown".to_string() },
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CoreError::validation("url", "bad").code(), "E1001");
        assert_eq!(CoreError::not_found("endpoint", "x").code(), "E1002");
        assert_eq!(
            CoreError::InvalidStatusTransition {
                from: EndpointStatus::Paused,
                to: EndpointStatus::Failed
            }
            .code(),
            "E1003"
        );
        assert_eq!(CoreError::Storage("down".into()).code(), "E3001");
    }

    #[test]
    fn validation_error_names_field() {
        let err = CoreError::validation("timeoutSeconds", "must be between 5 and 120");

        assert_eq!(err.field(), Some("timeoutSeconds"));
        assert!(err.to_string().contains("timeoutSeconds"));
        assert_eq!(CoreError::Storage("x".into()).field(), None);
    }
}
