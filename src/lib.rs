//! # htmx_gate
//!
//! A small server-rendered HTML site on Axum, guarded by a per-client-IP
//! token bucket rate limiter.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Catch Panic → Trace → Timeout → Security →     │
//! │              Rate Limit)                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, home, count)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IpRateLimiter (bounded LRU of token buckets, idle sweep)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use htmx_gate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state.clone());
//!
//!     // Serve `app`, then:
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! RATE_LIMIT_RPM=50 RATE_LIMIT_MAX_ENTRIES=10000 cargo run
//! ```
//!
//! Behind a reverse proxy, enable forwarding headers and restrict them to the
//! proxy's addresses:
//!
//! ```bash
//! TRUST_PROXY_HEADERS=true TRUSTED_PROXIES=10.0.0.0/8 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use limiter::{IpRateLimiter, RateLimitConfig, RateLimitError, TokenBucket};
pub use routes::build_router;
pub use state::AppState;
