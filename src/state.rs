//! Shared application state for Axum handlers and middleware.
//!
//! # Structured Concurrency
//!
//! The rate limiter's idle sweep is tracked with
//! `tokio_util::task::TaskTracker` and stopped through a `CancellationToken`.
//! Call `shutdown()` after the HTTP server stops to end it cleanly.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::limiter::IpRateLimiter;
use crate::middleware::{IpConfig, RateLimitLayer, client_ip};

/// Shared application state.
///
/// Cloned for each request handler; everything inside is behind `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Stop the idle sweep
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Client identification settings shared by the middleware stack
    pub ip_config: Arc<IpConfig>,
    /// Per-client rate limiting layer (`None` when rate limiting is disabled)
    pub rate_limit: Option<RateLimitLayer>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Counter shown on the home page
    counter: Arc<AtomicI64>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// When rate limiting is enabled this builds the rate limiting layer,
    /// keyed by [`client_ip`], and spawns its idle sweep; it must be called
    /// inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RateLimit` if the rate limiter settings are invalid.
    pub fn new(config: Config) -> AppResult<Self> {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let ip_config = Arc::new(config.ip_config());

        let rate_limit = if config.rate_limiting_enabled() {
            let key_config = Arc::clone(&ip_config);
            Some(RateLimitLayer::spawn(
                &task_tracker,
                cancellation_token.clone(),
                config.rate_limit(),
                move |req| client_ip(req, &key_config),
            )?)
        } else {
            None
        };

        Ok(Self {
            ip_config,
            config: Arc::new(config),
            rate_limit,
            started_at: Instant::now(),
            counter: Arc::new(AtomicI64::new(0)),
            task_tracker,
            cancellation_token,
        })
    }

    /// The limiter behind the rate limiting layer, if enabled.
    pub fn limiter(&self) -> Option<&Arc<IpRateLimiter>> {
        self.rate_limit.as_ref().map(RateLimitLayer::limiter)
    }

    /// Current counter value.
    pub fn count(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Increment the counter, returning the new value.
    pub fn increment(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_spawns_sweeper_and_shutdown_stops_it() {
        let state = AppState::new(Config::default()).unwrap();
        assert!(state.limiter().is_some());
        assert_eq!(state.task_tracker.len(), 1);

        state.shutdown().await;
        assert!(state.task_tracker.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limiting_disabled() {
        let config = Config {
            rate_limit_rpm: 0,
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        assert!(state.limiter().is_none());
        assert!(state.task_tracker.is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_limiter_config() {
        let config = Config {
            rate_limit_max_entries: 0,
            ..Config::default()
        };
        assert!(AppState::new(config).is_err());
    }

    #[tokio::test]
    async fn test_counter_is_per_state() {
        let a = AppState::new(Config::default()).unwrap();
        let b = AppState::new(Config::default()).unwrap();

        assert_eq!(a.increment(), 1);
        assert_eq!(a.increment(), 2);
        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 0);

        a.shutdown().await;
        b.shutdown().await;
    }
}
