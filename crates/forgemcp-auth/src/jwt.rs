//! JWT bearer-token provider.
//!
//! Verifies tokens against a remote JWKS with pinned issuer and audience.
//! Every failure mode — malformed token, bad signature, expiry, issuer or
//! audience mismatch — collapses to `None` so callers cannot leak why a
//! token was rejected; the reason is logged at debug level only.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, TokenData, Validation};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::cache::TokenCache;
use crate::jwks::JwksClient;
use crate::types::{AuthInfo, AuthProvider, ResourceMetadata};

/// Configuration for [`JwtAuthProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct JwtConfig {
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// JWKS endpoint; derived from the issuer when not set
    pub jwks_uri: Option<String>,
    /// The protected resource this server represents (RFC 9728)
    pub resource: String,
    /// Authorization servers advertised in resource metadata
    pub authorization_servers: Vec<String>,
    /// Scopes advertised in resource metadata
    pub scopes_supported: Option<Vec<String>>,
}

impl JwtConfig {
    /// The JWKS endpoint: explicit when configured, otherwise
    /// `{issuer}/.well-known/jwks.json`.
    pub fn jwks_uri(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/jwks.json",
                self.issuer.trim_end_matches('/')
            )
        })
    }
}

/// JWKS-backed JWT verifier with a bounded token cache.
#[derive(Debug)]
pub struct JwtAuthProvider {
    config: JwtConfig,
    jwks: Arc<JwksClient>,
    cache: TokenCache,
    allowed_algorithms: Vec<Algorithm>,
}

impl JwtAuthProvider {
    /// Create a provider. The JWKS client is long-lived and shared across
    /// verifications; it is never re-created per call.
    pub fn new(config: JwtConfig) -> Self {
        let jwks = Arc::new(JwksClient::new(config.jwks_uri()));
        Self {
            config,
            jwks,
            cache: TokenCache::default(),
            allowed_algorithms: vec![Algorithm::ES256, Algorithm::RS256, Algorithm::PS256],
        }
    }

    /// Create a provider sharing an existing JWKS client (e.g. several
    /// providers against the same issuer).
    pub fn with_jwks_client(config: JwtConfig, jwks: Arc<JwksClient>) -> Self {
        Self {
            config,
            jwks,
            cache: TokenCache::default(),
            allowed_algorithms: vec![Algorithm::ES256, Algorithm::RS256, Algorithm::PS256],
        }
    }

    /// The provider configuration.
    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    async fn decoding_key(&self, kid: &str) -> Option<(DecodingKey, Vec<Algorithm>)> {
        let jwks = self.jwks.get().await.ok()?;
        let jwk = match jwks.find(kid) {
            Some(jwk) => jwk.clone(),
            None => {
                // Key may have rotated since the cached fetch
                let refreshed = self.jwks.refresh().await.ok()?;
                refreshed.find(kid)?.clone()
            }
        };
        let key = DecodingKey::from_jwk(&jwk).ok()?;
        Some((key, self.allowed_algorithms.clone()))
    }

    fn build_auth_info(payload: Value) -> AuthInfo {
        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let client_id = payload
            .get("azp")
            .or_else(|| payload.get("client_id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let scopes = scopes_from_claims(&payload);
        let expires_at = payload.get("exp").and_then(Value::as_u64);

        AuthInfo {
            subject,
            client_id,
            scopes,
            claims: payload,
            expires_at,
        }
    }

    async fn verify_inner(&self, token: &str) -> Option<AuthInfo> {
        let header = decode_header(token)
            .map_err(|e| debug!(error = %e, "auth.reject: malformed JWT header"))
            .ok()?;

        if !self.allowed_algorithms.contains(&header.alg) {
            debug!(algorithm = ?header.alg, "auth.reject: algorithm not allowed");
            return None;
        }
        let kid = header.kid.as_deref().or_else(|| {
            debug!("auth.reject: JWT missing kid");
            None
        })?;

        let (key, _) = self.decoding_key(kid).await.or_else(|| {
            debug!(kid = %kid, "auth.reject: no matching JWKS key");
            None
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = 60;

        let data: TokenData<Value> = decode(token, &key, &validation)
            .map_err(|e| debug!(error = %e, "auth.reject: JWT validation failed"))
            .ok()?;

        Some(Self::build_auth_info(data.claims))
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn verify_token(&self, token: &str) -> Option<AuthInfo> {
        if let Some(info) = self.cache.get(token) {
            debug!(subject = %info.subject, "auth.cache_hit");
            return Some(info);
        }

        let info = self.verify_inner(token).await?;
        debug!(subject = %info.subject, "auth.verify");
        self.cache.insert(token, info.clone());
        Some(info)
    }

    fn resource_metadata(&self) -> ResourceMetadata {
        ResourceMetadata::new(
            self.config.resource.clone(),
            self.config.authorization_servers.clone(),
            self.config.scopes_supported.clone(),
        )
    }
}

/// Scopes from the `scope` claim (space-delimited, empties filtered) or the
/// `scp` claim (array of strings). Duplicates are dropped, order kept.
fn scopes_from_claims(payload: &Value) -> Vec<String> {
    let raw: Vec<String> = if let Some(scope) = payload.get("scope").and_then(Value::as_str) {
        scope
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    } else if let Some(scp) = payload.get("scp").and_then(Value::as_array) {
        scp.iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let mut seen = Vec::with_capacity(raw.len());
    for scope in raw {
        if !seen.contains(&scope) {
            seen.push(scope);
        }
    }
    seen
}
