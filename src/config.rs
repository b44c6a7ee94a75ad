//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults
//! suited to development. In production, configure via environment variables
//! or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_RPM`: Requests per minute per client, also the burst (default: 50, 0 = disabled)
//! - `RATE_LIMIT_MAX_ENTRIES`: Maximum tracked clients (default: 10000)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Idle sweep period (default: 600)
//! - `RATE_LIMIT_IDLE_TIMEOUT_SECS`: Idle time before a client is swept (default: 3600)
//!
//! # Client Identification
//!
//! - `TRUST_PROXY_HEADERS`: Honour `X-Forwarded-For`/`X-Real-IP` (default: false)
//! - `TRUSTED_PROXIES`: Comma-separated CIDRs allowed to set them (default: any peer)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::limiter::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_ENTRIES, DEFAULT_REQUESTS_PER_MINUTE,
    DEFAULT_SWEEP_INTERVAL, RateLimitConfig,
};
use crate::middleware::{IpConfig, TrustedProxyConfig};

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Upper bound on handling a single request (default: 15 seconds)
    pub request_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests per minute per client, also the burst size (default: 50)
    /// Set to 0 to disable rate limiting
    pub rate_limit_rpm: u32,

    /// Maximum number of clients tracked at once (default: 10000)
    pub rate_limit_max_entries: usize,

    /// Period of the idle sweep (default: 10 minutes)
    pub rate_limit_sweep_interval: Duration,

    /// Clients untouched for this long are swept (default: 1 hour)
    pub rate_limit_idle_timeout: Duration,

    // =========================================================================
    // Client Identification
    // =========================================================================
    /// Honour forwarding headers. Enable only behind a reverse proxy that
    /// overwrites them; otherwise clients can pick their own rate limit key.
    pub trust_proxy_headers: bool,

    /// Trusted proxy CIDR ranges. Forwarding headers are only honoured from
    /// peers inside these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (any peer, when `trust_proxy_headers` is set)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            request_timeout: Duration::from_secs(Self::parse_env("REQUEST_TIMEOUT_SECS", 15)?),

            // Rate limiting
            rate_limit_rpm: Self::parse_env("RATE_LIMIT_RPM", DEFAULT_REQUESTS_PER_MINUTE)?,
            rate_limit_max_entries: Self::parse_env("RATE_LIMIT_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?),
            rate_limit_idle_timeout: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT.as_secs(),
            )?),

            // Client identification
            trust_proxy_headers: Self::parse_env("TRUST_PROXY_HEADERS", false)?,
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.request_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limiting_enabled() {
            if self.rate_limit_max_entries == 0 {
                return Err(AppError::ConfigError(
                    "RATE_LIMIT_MAX_ENTRIES must be greater than 0".to_string(),
                ));
            }
            if self.rate_limit_sweep_interval.is_zero() {
                return Err(AppError::ConfigError(
                    "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
                ));
            }
        }

        if !self.trust_proxy_headers && !self.trusted_proxies.is_empty() {
            return Err(AppError::ConfigError(
                "TRUSTED_PROXIES requires TRUST_PROXY_HEADERS=true".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rpm > 0
    }

    /// Rate limiter settings derived from this configuration.
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: self.rate_limit_rpm,
            max_entries: self.rate_limit_max_entries,
            sweep_interval: self.rate_limit_sweep_interval,
            idle_timeout: self.rate_limit_idle_timeout,
        }
    }

    /// Client identification settings derived from this configuration.
    pub fn ip_config(&self) -> IpConfig {
        IpConfig {
            trust_proxy_headers: self.trust_proxy_headers,
            trusted_proxies: TrustedProxyConfig::new(&self.trusted_proxies),
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse trusted proxy CIDR ranges from environment variable.
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(15),
            // Rate limiting
            rate_limit_rpm: DEFAULT_REQUESTS_PER_MINUTE,
            rate_limit_max_entries: DEFAULT_MAX_ENTRIES,
            rate_limit_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            rate_limit_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            // Client identification
            trust_proxy_headers: false,
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_rpm, 50);
        assert_eq!(config.rate_limit_max_entries, 10_000);
        assert_eq!(config.rate_limit_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.rate_limit_idle_timeout, Duration::from_secs(3600));
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_rpm: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_rate_limit_config_mapping() {
        let config = Config {
            rate_limit_rpm: 3,
            rate_limit_max_entries: 7,
            ..Config::default()
        };
        let limit = config.rate_limit();
        assert_eq!(limit.requests_per_minute, 3);
        assert_eq!(limit.max_entries, 7);
        assert!(limit.validate().is_ok());
    }

    #[test]
    fn test_ip_config_mapping() {
        let config = Config {
            trust_proxy_headers: true,
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Config::default()
        };
        let ip = config.ip_config();
        assert!(ip.trust_proxy_headers);
        assert!(ip.trusted_proxies.is_enabled());
    }

    #[test]
    fn test_metrics_addr() {
        assert_eq!(
            Config::default().metrics_addr(),
            Some(SocketAddr::from(([0, 0, 0, 0], 9090)))
        );
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_zero_max_entries() {
        let config = Config {
            rate_limit_max_entries: 0,
            ..Config::default()
        };
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RATE_LIMIT_MAX_ENTRIES"));
    }

    #[test]
    fn test_validate_zero_max_entries_ignored_when_disabled() {
        let config = Config {
            rate_limit_rpm: 0,
            rate_limit_max_entries: 0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_trusted_proxies_without_trust() {
        let config = Config {
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Config::default()
        };
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("TRUSTED_PROXIES"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
