//! Client IP extraction for rate limiting and request logging.
//!
//! # Deployment Modes
//!
//! - **Behind a reverse proxy** (`TRUST_PROXY_HEADERS=true`): the client is the
//!   first hop of `X-Forwarded-For`, then `X-Real-IP`. Values are trimmed,
//!   stripped of a port and validated as IP addresses; anything unparseable
//!   falls through to the next source.
//! - **Directly exposed** (default): client-supplied headers are ignored and
//!   only the TCP peer address is used.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarding headers are written by whoever sent the request. When they are
//! trusted and the service is reachable without the proxy, attackers can:
//!
//! - **Bypass rate limiting** by rotating spoofed IPs in `X-Forwarded-For`
//! - **Frame innocent IPs** and exhaust their buckets
//!
//! Configure your proxy to overwrite (not append to) these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! and set `TRUSTED_PROXIES` to its network so headers arriving from any other
//! peer are ignored.
//!
//! # Peer Address
//!
//! The peer address comes from axum's `ConnectInfo<SocketAddr>` extension,
//! present when the server is started with
//! `into_make_service_with_connect_info::<SocketAddr>()`. Without it, all
//! unidentifiable requests share the [`UNKNOWN_IP`] key.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback key when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a single-host range.
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Networks whose connections may set forwarding headers.
///
/// An empty configuration trusts headers from any peer.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Whether any ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `peer` may set forwarding headers.
    ///
    /// With ranges configured, an unknown peer is never trusted.
    pub fn is_trusted(&self, peer: Option<IpAddr>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.ranges.iter().any(|range| range.contains(&ip)))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// How client addresses are resolved for a deployment.
#[derive(Debug, Clone, Default)]
pub struct IpConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP` (only behind a reverse proxy)
    pub trust_proxy_headers: bool,
    /// Peers allowed to set those headers
    pub trusted_proxies: TrustedProxyConfig,
}

impl IpConfig {
    /// Configuration for a service exposed without a proxy.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Configuration for a service behind the given proxies.
    pub fn behind_proxy(trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            trust_proxy_headers: true,
            trusted_proxies,
        }
    }

    /// Whether forwarding headers on `req` may be believed.
    pub fn trusts_headers_of<B>(&self, req: &Request<B>) -> bool {
        self.trust_proxy_headers && self.trusted_proxies.is_trusted(peer_ip(req))
    }
}

/// Resolve the client identifier for `req`.
///
/// # Resolution Order
///
/// 1. First hop of `X-Forwarded-For` (trusted mode only)
/// 2. `X-Real-IP` (trusted mode only)
/// 3. TCP peer address
/// 4. [`UNKNOWN_IP`]
pub fn client_ip<B>(req: &Request<B>, config: &IpConfig) -> String {
    let peer = peer_ip(req);

    if config.trusts_headers_of(req) {
        if let Some(ip) = forwarded_for(req) {
            return ip.to_string();
        }
        if let Some(ip) = real_ip(req) {
            return ip.to_string();
        }
    } else if config.trust_proxy_headers && req.headers().contains_key(X_FORWARDED_FOR) {
        debug!(
            peer = ?peer,
            "Ignoring X-Forwarded-For from untrusted peer"
        );
    }

    match peer {
        Some(ip) => ip.to_string(),
        None => UNKNOWN_IP.to_string(),
    }
}

#[inline]
fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// First (leftmost) address of `X-Forwarded-For`: "client, proxy1, proxy2".
fn forwarded_for<B>(req: &Request<B>) -> Option<IpAddr> {
    let value = req.headers().get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?;
    parse_addr(first)
}

fn real_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let value = req.headers().get(X_REAL_IP)?.to_str().ok()?;
    parse_addr(value)
}

/// Parse an address that may carry a port ("1.2.3.4:80", "[::1]:8080").
pub fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(socket) = raw.parse::<SocketAddr>() {
        return Some(socket.ip());
    }
    raw.parse::<IpAddr>().ok()
}
