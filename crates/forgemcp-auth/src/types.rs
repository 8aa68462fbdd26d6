//! Core authentication types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Verified identity attached to an invocation.
///
/// Produced by an [`AuthProvider`]; consumed by scope enforcement and user
/// middlewares. Scopes are an ordered sequence without duplicates and never
/// contain empty strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Token subject (`sub`), or `"unknown"` when the claim is absent
    pub subject: String,
    /// OAuth client id (`azp`, falling back to `client_id`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Full token payload for downstream middlewares
    pub claims: Value,
    /// Expiry as Unix seconds (`exp`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl AuthInfo {
    /// Whether every scope in `required` is granted.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }

    /// The required scopes that are not granted.
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|s| !self.scopes.contains(*s))
            .cloned()
            .collect()
    }
}

/// RFC 9728 OAuth Protected Resource Metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// The protected resource identifier
    pub resource: String,
    /// Authorization servers that issue tokens for the resource
    pub authorization_servers: Vec<String>,
    /// Scopes the resource understands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Supported bearer presentation methods; always `["header"]` here
    pub bearer_methods_supported: Vec<String>,
}

impl ResourceMetadata {
    /// Metadata for a resource with header-only bearer presentation.
    pub fn new(
        resource: impl Into<String>,
        authorization_servers: Vec<String>,
        scopes_supported: Option<Vec<String>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers,
            scopes_supported,
            bearer_methods_supported: vec!["header".to_string()],
        }
    }

    /// The well-known URL where this metadata is served, derived from the
    /// resource by trimming a trailing `/` and appending the RFC 9728 path.
    pub fn metadata_url(&self) -> String {
        format!(
            "{}/.well-known/oauth-protected-resource",
            self.resource.trim_end_matches('/')
        )
    }
}

/// Token verifier abstraction.
///
/// The JWT provider is the default implementation; API-key or opaque-token
/// providers implement the same two capabilities.
#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Verify an opaque bearer token. All failures collapse to `None`; no
    /// details about why a token was rejected are surfaced to callers.
    async fn verify_token(&self, token: &str) -> Option<AuthInfo>;

    /// RFC 9728 metadata describing the protected resource.
    fn resource_metadata(&self) -> ResourceMetadata;
}

/// Structured authentication failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    /// No `Authorization: Bearer` header was supplied
    MissingToken,
    /// The token failed verification
    InvalidToken,
    /// The token lacks scopes the tool requires
    InsufficientScope,
}

impl AuthErrorCode {
    /// The RFC 6750 error string for the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
        }
    }
}

/// Structured authentication failure, carrying everything the HTTP layer
/// needs to build a status-coded response.
#[derive(Debug, Clone)]
pub struct AuthError {
    /// Failure code
    pub code: AuthErrorCode,
    /// Where RFC 9728 metadata for the resource can be fetched
    pub resource_metadata_url: Option<String>,
    /// For `InsufficientScope`: the scopes that were missing
    pub missing_scopes: Option<Vec<String>>,
}

impl AuthError {
    /// No bearer token was presented.
    pub fn missing_token(resource_metadata_url: Option<String>) -> Self {
        Self {
            code: AuthErrorCode::MissingToken,
            resource_metadata_url,
            missing_scopes: None,
        }
    }

    /// The presented token failed verification.
    pub fn invalid_token(resource_metadata_url: Option<String>) -> Self {
        Self {
            code: AuthErrorCode::InvalidToken,
            resource_metadata_url,
            missing_scopes: None,
        }
    }

    /// The token is valid but lacks required scopes.
    pub fn insufficient_scope(
        missing_scopes: Vec<String>,
        resource_metadata_url: Option<String>,
    ) -> Self {
        Self {
            code: AuthErrorCode::InsufficientScope,
            resource_metadata_url,
            missing_scopes: Some(missing_scopes),
        }
    }
}

impl std::error::Error for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            AuthErrorCode::MissingToken => write!(f, "Authentication required"),
            AuthErrorCode::InvalidToken => write!(f, "Invalid or expired token"),
            AuthErrorCode::InsufficientScope => {
                write!(f, "Insufficient scope")?;
                if let Some(missing) = &self.missing_scopes {
                    write!(f, ": missing {}", missing.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(scopes: &[&str]) -> AuthInfo {
        AuthInfo {
            subject: "user-1".into(),
            client_id: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            claims: json!({}),
            expires_at: None,
        }
    }

    #[test]
    fn scope_checks() {
        let i = info(&["read", "write"]);
        assert!(i.has_scopes(&["read".into()]));
        assert!(i.has_scopes(&[]));
        assert!(!i.has_scopes(&["admin".into()]));
        assert_eq!(
            i.missing_scopes(&["read".into(), "admin".into()]),
            vec!["admin".to_string()]
        );
    }

    #[test]
    fn metadata_url_trims_trailing_slash() {
        let m = ResourceMetadata::new("https://mcp.example.com/", vec![], None);
        assert_eq!(
            m.metadata_url(),
            "https://mcp.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn insufficient_scope_lists_missing() {
        let err = AuthError::insufficient_scope(vec!["admin".into()], None);
        assert!(err.to_string().contains("admin"));
        assert_eq!(err.code.as_str(), "insufficient_scope");
    }
}
