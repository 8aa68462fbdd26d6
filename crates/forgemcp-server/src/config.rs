//! Server configuration.

use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

use crate::limits::RateLimitConfig;
use crate::middleware::RateLimitMode;
use crate::session::SessionConfig;

/// Default request body cap in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

/// Protocol revision advertised during initialization.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Dedicated `initialize` limiter: requests per window per IP.
pub const INITIALIZE_MAX_REQUESTS: usize = 10;
/// Dedicated `initialize` limiter window.
pub const INITIALIZE_WINDOW: Duration = Duration::from_secs(60);

/// CORS behaviour. An empty origin list reflects `*`, which logs a
/// warning at startup.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins; empty means any
    pub origins: Vec<String>,
}

/// Inputs available to a custom IP rate-limit key extractor.
#[derive(Debug, Clone)]
pub struct HttpRequestMeta {
    /// Resolved client IP
    pub ip: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Session id header, when present
    pub session_id: Option<String>,
}

/// Custom key extractor for the IP rate limiter.
pub type IpKeyFn = dyn Fn(&HttpRequestMeta) -> String + Send + Sync;

/// IP-level rate limiting, independent of the per-tool limiter.
#[derive(Clone)]
pub struct IpRateLimitConfig {
    /// Window configuration
    pub limit: RateLimitConfig,
    /// Reject with 429 or wait for a slot
    pub mode: RateLimitMode,
    /// Key extractor; defaults to the client IP
    pub key_fn: Option<Arc<IpKeyFn>>,
    /// How long `wait` mode blocks before shape-returning 429
    pub wait_timeout: Duration,
}

impl std::fmt::Debug for IpRateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpRateLimitConfig")
            .field("limit", &self.limit)
            .field("mode", &self.mode)
            .field("custom_key", &self.key_fn.is_some())
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

impl IpRateLimitConfig {
    /// Reject-mode limiting keyed by client IP.
    pub fn reject(limit: RateLimitConfig) -> Self {
        Self {
            limit,
            mode: RateLimitMode::Reject,
            key_fn: None,
            wait_timeout: Duration::from_secs(10),
        }
    }

    /// Wait-mode limiting keyed by client IP.
    pub fn wait(limit: RateLimitConfig, wait_timeout: Duration) -> Self {
        Self {
            limit,
            mode: RateLimitMode::Wait,
            key_fn: None,
            wait_timeout,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name advertised in `serverInfo` and `/health`
    pub name: String,
    /// Server version advertised in `serverInfo` and `/health`
    pub version: String,
    /// Advertised protocol revision
    pub protocol_version: String,
    /// Request body cap; `None` disables the check
    pub max_body_bytes: Option<usize>,
    /// CORS behaviour; `None` leaves CORS off
    pub cors: Option<CorsConfig>,
    /// CSP policy injected into HTML resource reads
    pub resource_csp: Option<String>,
    /// Session limits
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "forgemcp-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            cors: None,
            resource_csp: None,
            session: SessionConfig::default(),
        }
    }
}
