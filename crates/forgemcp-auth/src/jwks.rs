//! JWKS fetching and caching.
//!
//! A [`JwksClient`] is long-lived and shared by every verification; it
//! caches the key set with a TTL and rate-limits forced refreshes so a
//! storm of bad tokens cannot DoS the authorization server.

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Errors from JWKS fetching.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Endpoint URL is not HTTPS (localhost excepted)
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for localhost)")]
    InsecureEndpoint,
    /// Network or HTTP failure
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),
    /// Response was not a valid key set
    #[error("JWKS response was not a valid key set: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Client for a single JWKS endpoint with TTL caching.
#[derive(Debug)]
pub struct JwksClient {
    jwks_uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    last_fetch_attempt: RwLock<Option<Instant>>,
}

impl JwksClient {
    /// Create a client for a JWKS endpoint.
    ///
    /// Defaults: 10 minute cache TTL, 5 second minimum interval between
    /// forced refreshes, 10 second fetch timeout.
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client with static configuration"),
            cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(5),
            last_fetch_attempt: RwLock::new(None),
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// The endpoint this client fetches from.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Get the key set, from cache when fresh.
    pub async fn get(&self) -> Result<JwkSet, JwksError> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    debug!(jwks_uri = %self.jwks_uri, "Using cached JWKS");
                    return Ok(cached.jwks.clone());
                }
            }
        }
        self.fetch_and_cache().await
    }

    /// Force a refresh, e.g. after a validation failure that may indicate
    /// key rotation. Rate-limited; returns the cached set when a refresh
    /// was attempted too recently.
    pub async fn refresh(&self) -> Result<JwkSet, JwksError> {
        let recently_attempted = {
            let last = self.last_fetch_attempt.read();
            last.is_some_and(|at| at.elapsed() < self.min_refresh_interval)
        };
        if recently_attempted {
            warn!(jwks_uri = %self.jwks_uri, "JWKS refresh rate limited, using cache");
            if let Some(cached) = self.cache.read().as_ref() {
                return Ok(cached.jwks.clone());
            }
        }
        self.fetch_and_cache().await
    }

    async fn fetch_and_cache(&self) -> Result<JwkSet, JwksError> {
        if !self.jwks_uri.starts_with("https://")
            && !self.jwks_uri.starts_with("http://localhost")
            && !self.jwks_uri.starts_with("http://127.0.0.1")
        {
            return Err(JwksError::InsecureEndpoint);
        }

        *self.last_fetch_attempt.write() = Some(Instant::now());
        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        *self.cache.write() = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_plain_http_endpoints() {
        let client = JwksClient::new("http://issuer.example.com/jwks");
        assert!(matches!(
            client.get().await,
            Err(JwksError::InsecureEndpoint)
        ));
    }

    #[tokio::test]
    async fn allows_localhost_http() {
        // Nothing is listening; the point is that the scheme check passes
        // and we fail on the network step instead.
        let client = JwksClient::new("http://localhost:1/jwks");
        assert!(matches!(client.get().await, Err(JwksError::Fetch(_))));
    }
}
