//! HTTP error envelope.
//!
//! Every failure leaves the API as `{"error": {"code", "message", "field?"}}`
//! with a status derived from the error code.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use medhook_core::CoreError;
use serde::Serialize;
use tracing::{debug, error};

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code (E1001-E3002).
    pub code: &'static str,
    /// Human-readable error description.
    pub message: String,
    /// Offending input field for validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Registry, intake or ledger error.
    Core(CoreError),
    /// `X-Tenant-Id` header absent or not a UUID (E1006).
    Tenant(String),
    /// Request body is not the expected JSON (E1001).
    Body(String),
}

impl ApiError {
    /// Returns the stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.code(),
            Self::Tenant(_) => "E1006",
            Self::Body(_) => "E1001",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(CoreError::Validation { .. }) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Core(CoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Core(
                CoreError::InvalidStatusTransition { .. }
                | CoreError::DeliveryFinalized { .. }
                | CoreError::ClaimConflict { .. },
            ) => StatusCode::CONFLICT,
            Self::Core(CoreError::Storage(_) | CoreError::Serialization(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            Self::Tenant(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn detail(self) -> ErrorDetail {
        let code = self.code();
        match self {
            Self::Core(e) => {
                let field = e.field().map(str::to_string);
                ErrorDetail { code, message: e.to_string(), field }
            },
            Self::Tenant(message) => ErrorDetail { code, message, field: None },
            Self::Body(message) => ErrorDetail { code, message, field: None },
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = ?self, "request failed");
        } else {
            debug!(code = self.code(), status = status.as_u16(), "request rejected");
        }

        (status, Json(ErrorResponse { error: self.detail() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use medhook_core::{DeliveryId, DeliveryStatus, EndpointStatus};

    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (CoreError::validation("url", "bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("endpoint", "x"), StatusCode::NOT_FOUND),
            (
                CoreError::InvalidStatusTransition {
                    from: EndpointStatus::Active,
                    to: EndpointStatus::Failed,
                },
                StatusCode::CONFLICT,
            ),
            (
                CoreError::DeliveryFinalized {
                    id: DeliveryId::new(),
                    status: DeliveryStatus::Success,
                },
                StatusCode::CONFLICT,
            ),
            (CoreError::ClaimConflict { id: DeliveryId::new() }, StatusCode::CONFLICT),
            (CoreError::Storage("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn validation_detail_carries_field() {
        let detail = ApiError::from(CoreError::validation("timeout", "out of range")).detail();

        assert_eq!(detail.code, "E1001");
        assert_eq!(detail.field.as_deref(), Some("timeout"));
    }

    #[test]
    fn tenant_error_is_unauthorized() {
        let err = ApiError::Tenant("missing X-Tenant-Id header".into());

        assert_eq!(err.code(), "E1006");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
