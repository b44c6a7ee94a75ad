//! Security response headers.
//!
//! Applied to every response:
//!
//! | Header | Value |
//! |--------|-------|
//! | `X-Frame-Options` | `DENY` |
//! | `X-Content-Type-Options` | `nosniff` |
//! | `Referrer-Policy` | `strict-origin-when-cross-origin` |
//! | `Permissions-Policy` | geolocation, microphone and camera disabled |
//! | `Content-Security-Policy` | same-origin sources only |
//!
//! `Strict-Transport-Security` is added only when the request reached us over
//! HTTPS. The server itself speaks plain HTTP, so this is known only from a
//! `X-Forwarded-Proto: https` header set by a trusted proxy.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS,
};
use axum::middleware::Next;
use axum::response::Response;

use super::ip::IpConfig;

const PERMISSIONS_POLICY: &str = "permissions-policy";

// Inline handlers and styles are kept allowed for HTMX-style markup.
const CSP: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline'; \
    style-src 'self' 'unsafe-inline'; \
    img-src 'self' data:; \
    connect-src 'self'; \
    font-src 'self'; \
    object-src 'none'; \
    base-uri 'self'; \
    form-action 'self'; \
    frame-ancestors 'none'";

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

/// Middleware adding security headers to the response.
///
/// Use with `axum::middleware::from_fn_with_state`, passing the same
/// [`IpConfig`] the rest of the stack uses.
pub async fn security_headers(
    State(ip_config): State<Arc<IpConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let https = ip_config.trusts_headers_of(&req)
        && req
            .headers()
            .get("x-forwarded-proto")
            .is_some_and(|proto| proto.as_bytes().eq_ignore_ascii_case(b"https"));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP));
    if https {
        headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }

    response
}
