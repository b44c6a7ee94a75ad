//! End-to-end tests against a real server on an ephemeral port.
//!
//! Each test starts its own instance with `into_make_service_with_connect_info`
//! so peer addresses reach the rate limiter exactly as in production.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use htmx_gate::middleware::REJECTION_MESSAGE;
use htmx_gate::{AppState, Config, build_router};

/// A running server and the handles needed to stop it.
struct TestServer {
    base_url: String,
    client: Client,
    state: AppState,
    stop: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let state = AppState::new(config).expect("Failed to build state");
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let stop = CancellationToken::new();
        let shutdown = stop.clone();
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .expect("Server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            client: Client::new(),
            state,
            stop,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_from(&self, forwarded_for: &str) -> reqwest::Response {
        self.client
            .get(self.url("/health"))
            .header("X-Forwarded-For", forwarded_for)
            .send()
            .await
            .expect("Request failed")
    }

    async fn stop(self) {
        self.stop.cancel();
        self.handle.await.unwrap();
        self.state.shutdown().await;
    }
}

fn behind_proxy(rpm: u32, max_entries: usize) -> Config {
    Config {
        rate_limit_rpm: rpm,
        rate_limit_max_entries: max_entries,
        trust_proxy_headers: true,
        metrics_port: 0,
        ..Config::default()
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_burst_then_reject() {
    let server = TestServer::start(behind_proxy(3, 100)).await;

    for _ in 0..3 {
        let response = server.get_from("1.2.3.4").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = server.get_from("1.2.3.4").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    assert_eq!(response.text().await.unwrap(), REJECTION_MESSAGE);

    // Other clients are unaffected
    let response = server.get_from("2.2.2.2").await;
    assert_eq!(response.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_forwarded_for_uses_first_hop() {
    let server = TestServer::start(behind_proxy(1, 100)).await;

    let response = server.get_from("5.6.7.8, 10.0.0.1").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Same client through a different proxy chain
    let response = server.get_from("5.6.7.8, 10.9.9.9").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let limiter = server.state.limiter().cloned().unwrap();
    assert!(limiter.contains("5.6.7.8"));
    assert_eq!(limiter.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_eviction_resets_least_recent_client() {
    let server = TestServer::start(behind_proxy(10, 2)).await;

    for _ in 0..10 {
        assert_eq!(server.get_from("10.0.0.1").await.status(), StatusCode::OK);
    }
    assert_eq!(
        server.get_from("10.0.0.1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // B and C push A out of the table
    assert_eq!(server.get_from("10.0.0.2").await.status(), StatusCode::OK);
    assert_eq!(server.get_from("10.0.0.3").await.status(), StatusCode::OK);

    let limiter = server.state.limiter().cloned().unwrap();
    assert!(!limiter.contains("10.0.0.1"));
    assert!(limiter.len() <= 2);

    // A returns with a fresh bucket
    assert_eq!(server.get_from("10.0.0.1").await.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_direct_mode_ignores_forwarding_headers() {
    let config = Config {
        rate_limit_rpm: 2,
        metrics_port: 0,
        ..Config::default()
    };
    let server = TestServer::start(config).await;

    // Spoofed headers do not buy extra requests
    assert_eq!(server.get_from("1.1.1.1").await.status(), StatusCode::OK);
    assert_eq!(server.get_from("2.2.2.2").await.status(), StatusCode::OK);
    assert_eq!(
        server.get_from("3.3.3.3").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let limiter = server.state.limiter().cloned().unwrap();
    assert!(limiter.contains("127.0.0.1"));
    assert_eq!(limiter.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_untrusted_peer_headers_ignored() {
    let config = Config {
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..behind_proxy(5, 100)
    };
    let server = TestServer::start(config).await;

    let response = server.get_from("9.9.9.9").await;
    assert_eq!(response.status(), StatusCode::OK);

    let limiter = server.state.limiter().cloned().unwrap();
    assert!(limiter.contains("127.0.0.1"));
    assert!(!limiter.contains("9.9.9.9"));

    server.stop().await;
}

// =============================================================================
// Pages
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start(behind_proxy(50, 100)).await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn test_home_and_counter() {
    let server = TestServer::start(behind_proxy(50, 100)).await;

    let page = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page.text().await.unwrap().contains("Count: 0"));

    for expected in 1..=3 {
        let response = server.client.post(server.url("/count")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.text().await.unwrap(),
            format!(r#"<div id="counter">Count: {expected}</div>"#)
        );
    }

    let page = server.client.get(server.url("/")).send().await.unwrap();
    assert!(page.text().await.unwrap().contains("Count: 3"));

    server.stop().await;
}

#[tokio::test]
async fn test_security_headers() {
    let server = TestServer::start(behind_proxy(50, 100)).await;

    let response = server
        .client
        .get(server.url("/"))
        .header("X-Forwarded-Proto", "https")
        .send()
        .await
        .unwrap();
    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("strict-transport-security"));

    server.stop().await;
}
