//! HTTP middleware for client identification, rate limiting and security headers.
//!
//! # Architecture
//!
//! ```text
//! Request → Catch Panic → Trace → Timeout → Security Headers → Rate Limiter → Handler
//!               ↓                    ↓                              ↓
//!           500 + error log       408                       429 + Retry-After
//! ```
//!
//! Panic recovery, tracing and timeouts come from `tower-http` and are wired
//! in [`routes`](crate::routes); this module holds the pieces specific to
//! this service.
//!
//! # Security Considerations
//!
//! - Forwarding headers are only honoured behind a trusted proxy
//! - Rate limiting is keyed by the resolved client IP
//! - HSTS is only announced when a trusted proxy reports HTTPS

pub mod ip;
pub mod rate_limit;
pub mod security;

pub use ip::{CidrRange, IpConfig, TrustedProxyConfig, UNKNOWN_IP, client_ip};
pub use rate_limit::{ClientIdFn, REJECTION_MESSAGE, RETRY_AFTER_SECS, RateLimitLayer};
pub use security::security_headers;
