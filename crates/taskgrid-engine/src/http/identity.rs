//! Caller identity taken from request headers.
//!
//! Authentication happens in front of this service; the headers carry the
//! already-established identity.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use taskgrid_core::SecurityContext;

pub const PRINCIPAL_HEADER: &str = "x-principal";
pub const AUTHORITIES_HEADER: &str = "x-authorities";
pub const EMAIL_HEADER: &str = "x-email";

/// Identity of the caller. Anonymous when no principal header is present.
#[derive(Debug, Clone)]
pub struct Caller(pub SecurityContext);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(identity_from_headers(&parts.headers)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Build a security context from `x-principal`, `x-authorities`
/// (comma-separated) and `x-email`.
pub fn identity_from_headers(headers: &HeaderMap) -> SecurityContext {
    let mut ctx = match header(headers, PRINCIPAL_HEADER) {
        Some(principal) => SecurityContext::new(principal),
        None => SecurityContext::anonymous(),
    };
    if let Some(authorities) = header(headers, AUTHORITIES_HEADER) {
        for authority in authorities.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            ctx = ctx.with_authority(authority);
        }
    }
    if let Some(email) = header(headers, EMAIL_HEADER) {
        ctx = ctx.with_email(email);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_static("alice"));
        headers.insert(AUTHORITIES_HEADER, HeaderValue::from_static("ADMIN, ANALYST,"));
        headers.insert(EMAIL_HEADER, HeaderValue::from_static("alice@example.org"));

        let ctx = identity_from_headers(&headers);
        assert_eq!(ctx.principal, "alice");
        assert_eq!(ctx.authorities, vec!["ADMIN", "ANALYST"]);
        assert!(ctx.is_admin());
        assert_eq!(ctx.email.as_deref(), Some("alice@example.org"));
    }

    #[test]
    fn test_missing_headers_are_anonymous() {
        let ctx = identity_from_headers(&HeaderMap::new());
        assert_eq!(ctx, SecurityContext::anonymous());
    }
}
