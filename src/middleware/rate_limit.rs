//! Per-client rate limiting middleware.
//!
//! Wraps an [`IpRateLimiter`] in a Tower layer. Each request is keyed by the
//! client identifier returned from an injected extraction function (see
//! [`client_ip`](super::ip::client_ip)), then either forwarded untouched or
//! answered directly with `429 Too Many Requests`.
//!
//! # Response Headers
//!
//! On rejection:
//! - `Retry-After`: fixed advisory value of 60 seconds
//! - `X-RateLimit-Limit`: configured requests per minute
//! - `X-RateLimit-Remaining`: always `0`

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::warn;

use crate::limiter::{IpRateLimiter, RateLimitConfig, RateLimitError};

/// Advisory `Retry-After` value in seconds.
pub const RETRY_AFTER_SECS: u64 = 60;

/// Body of every rejection.
pub const REJECTION_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Function resolving the client identifier of a request.
pub type ClientIdFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::spawn(
///     &tracker,
///     shutdown.clone(),
///     RateLimitConfig::new(50, 10_000),
///     move |req| client_ip(req, &ip_config),
/// )?;
/// let app = Router::new().route("/", get(handler)).layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<IpRateLimiter>,
    client_id: ClientIdFn,
}

impl RateLimitLayer {
    /// Wrap an existing limiter.
    pub fn new<F>(limiter: Arc<IpRateLimiter>, client_id: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        Self {
            limiter,
            client_id: Arc::new(client_id),
        }
    }

    /// Build a limiter from `config`, start its idle sweep on `tracker`, and
    /// wrap it.
    ///
    /// The sweep stops when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] if the configuration is invalid.
    pub fn spawn<F>(
        tracker: &TaskTracker,
        shutdown: CancellationToken,
        config: RateLimitConfig,
        client_id: F,
    ) -> Result<Self, RateLimitError>
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        let limiter = IpRateLimiter::new(config, shutdown)?;
        limiter.spawn_sweeper(tracker);
        Ok(Self::new(limiter, client_id))
    }

    /// The wrapped limiter.
    pub fn limiter(&self) -> &Arc<IpRateLimiter> {
        &self.limiter
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            client_id: self.client_id.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<IpRateLimiter>,
    client_id: ClientIdFn,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let client_ip = (self.client_id)(&req);

        if self.limiter.check(&client_ip) {
            // The clone is not necessarily ready; swap so the polled one is used.
            let clone = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, clone);
            return Box::pin(async move { inner.call(req).await });
        }

        warn!(
            client_ip = %client_ip,
            method = %req.method(),
            path = %req.uri().path(),
            "Rate limit exceeded"
        );

        let response = rejection(self.limiter.config().requests_per_minute);
        Box::pin(async move { Ok(response) })
    }
}

/// Build the 429 response sent to rejected clients.
fn rejection(limit: u32) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("Retry-After", RETRY_AFTER_SECS.to_string()),
            ("X-RateLimit-Limit", limit.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
        ],
        REJECTION_MESSAGE,
    )
        .into_response()
}
