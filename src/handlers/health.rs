//! Health endpoint.
//!
//! `GET /health` always answers 200 OK. It sits behind the rate limiter like
//! every other route, so a monitored client can still see a 429.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::state::AppState;

/// Health check response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Clients currently holding a bucket; absent when rate limiting is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_clients: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "version": "0.1.0",
///   "uptime_seconds": 42,
///   "tracked_clients": 3,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        tracked_clients: state.limiter().map(|limiter| limiter.len()),
        timestamp: Utc::now(),
    })
}
