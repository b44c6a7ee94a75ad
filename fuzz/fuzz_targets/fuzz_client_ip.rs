//! Fuzz target for client IP extraction.
//!
//! Feeds arbitrary forwarding headers, peer addresses and trusted proxy
//! ranges through `client_ip` and checks that it never panics and always
//! yields a usable identifier.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_client_ip -- -max_total_time=60
//! ```

#![no_main]

use std::net::{IpAddr, SocketAddr};

use arbitrary::Arbitrary;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use libfuzzer_sys::fuzz_target;

use htmx_gate::middleware::ip::parse_addr;
use htmx_gate::middleware::{CidrRange, IpConfig, TrustedProxyConfig, UNKNOWN_IP, client_ip};

#[derive(Arbitrary, Debug)]
struct Input {
    forwarded_for: Option<String>,
    real_ip: Option<String>,
    peer: Option<([u8; 16], u16, bool)>,
    trust_proxy_headers: bool,
    trusted_proxies: Vec<String>,
}

fuzz_target!(|input: Input| {
    for cidr in &input.trusted_proxies {
        let _ = CidrRange::parse(cidr);
    }
    if let Some(raw) = &input.forwarded_for {
        let _ = parse_addr(raw);
    }

    let mut builder = Request::builder();
    if let Some(value) = &input.forwarded_for {
        builder = builder.header("x-forwarded-for", value.as_str());
    }
    if let Some(value) = &input.real_ip {
        builder = builder.header("x-real-ip", value.as_str());
    }
    // Header values that are not valid HTTP are rejected by the builder
    let Ok(mut req) = builder.body(Body::empty()) else {
        return;
    };

    let peer = input.peer.map(|(octets, port, v4)| {
        let ip = if v4 {
            IpAddr::from([octets[0], octets[1], octets[2], octets[3]])
        } else {
            IpAddr::from(octets)
        };
        SocketAddr::new(ip, port)
    });
    if let Some(addr) = peer {
        req.extensions_mut().insert(ConnectInfo(addr));
    }

    let config = IpConfig {
        trust_proxy_headers: input.trust_proxy_headers,
        trusted_proxies: TrustedProxyConfig::new(&input.trusted_proxies),
    };
    let ip = client_ip(&req, &config);

    assert!(!ip.is_empty());
    if ip != UNKNOWN_IP {
        assert!(ip.parse::<IpAddr>().is_ok(), "not an address: {ip}");
    }
    if !input.trust_proxy_headers {
        let expected = peer.map_or_else(|| UNKNOWN_IP.to_string(), |addr| addr.ip().to_string());
        assert_eq!(ip, expected);
    }
});
