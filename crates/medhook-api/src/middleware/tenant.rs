//! Tenant scoping from the `X-Tenant-Id` header.
//!
//! Authentication happens upstream; the header is trusted as-is. The parsed
//! tenant is injected as a request extension for downstream handlers.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use medhook_core::TenantId;

use crate::error::ApiError;

/// Header carrying the caller's tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Parses the tenant from request headers.
fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let value = headers
        .get(TENANT_HEADER)
        .ok_or_else(|| ApiError::Tenant("missing X-Tenant-Id header".to_string()))?;

    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<TenantId>().ok())
        .ok_or_else(|| ApiError::Tenant("X-Tenant-Id must be a UUID".to_string()))
}

/// Axum middleware that scopes a request to the tenant in `X-Tenant-Id`.
pub async fn tenant_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let tenant_id = extract_tenant(req.headers())?;
    req.extensions_mut().insert(tenant_id);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extract_tenant_from_header() {
        let tenant = TenantId::new();
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&tenant.to_string()).unwrap());

        assert_eq!(extract_tenant(&headers).unwrap(), tenant);
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = extract_tenant(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), "E1006");
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("hospital-7"));

        assert!(extract_tenant(&headers).is_err());
    }
}
