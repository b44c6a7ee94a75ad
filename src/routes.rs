//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← 500 + error log if a handler panics
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Timeout      │ ← 408 after REQUEST_TIMEOUT_SECS
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← Also applied to 429 responses
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `GET /health` - Health check
//! - `GET /` - Home page
//! - `POST /count` - Increment the counter, returns an HTML fragment

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{Span, error, info, info_span};

use crate::handlers;
use crate::middleware::{IpConfig, client_ip, security_headers};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting is applied when the state carries a limiter, i.e. when
/// `RATE_LIMIT_RPM > 0`.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::home))
        .route("/count", post(handlers::count));

    with_middleware(router, &state).with_state(state)
}

/// Wrap `router` in the middleware stack (applied bottom to top).
fn with_middleware(mut router: Router<AppState>, state: &AppState) -> Router<AppState> {
    let config = &state.config;

    // 1. Rate limiting, innermost so rejected requests still pass through
    //    the layers below
    if let Some(rate_limit) = &state.rate_limit {
        info!(
            rpm = config.rate_limit_rpm,
            max_entries = config.rate_limit_max_entries,
            trust_proxy_headers = config.trust_proxy_headers,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(rate_limit.clone());
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_RPM=0)");
    }

    // 2. Security headers
    router = router.layer(axum::middleware::from_fn_with_state(
        state.ip_config.clone(),
        security_headers,
    ));

    // 3. Timeout
    info!(
        timeout_secs = config.request_timeout.as_secs(),
        "Request timeout configured"
    );
    router = router.layer(TimeoutLayer::new(config.request_timeout));

    // 4. Tracing
    router = router.layer(TraceLayer::new_for_http().make_span_with(HttpMakeSpan {
        ip_config: Arc::clone(&state.ip_config),
    }));

    // 5. Panic recovery, outermost
    router.layer(CatchPanicLayer::custom(handle_panic))
}

/// Request span carrying the resolved client address as `remote`.
#[derive(Clone, Debug)]
struct HttpMakeSpan {
    ip_config: Arc<IpConfig>,
}

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        info_span!(
            "http.request",
            method = %req.method(),
            path = %req.uri().path(),
            remote = %client_ip(req, &self.ip_config)
        )
    }
}

/// Log a handler panic and answer with a plain 500.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "Handler panicked");

    (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response()
}
