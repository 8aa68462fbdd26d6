//! Provider presets.
//!
//! Thin factories that pre-fill issuer, authorization servers and JWKS
//! location for common identity providers. Each returns a [`JwtConfig`]
//! ready for [`JwtAuthProvider::new`](crate::JwtAuthProvider::new).

use crate::jwt::JwtConfig;

/// Options shared by every preset.
#[derive(Debug, Clone)]
pub struct PresetOptions {
    /// Expected `aud` claim
    pub audience: String,
    /// The protected resource this server represents
    pub resource: String,
    /// Scopes advertised in RFC 9728 metadata
    pub scopes_supported: Option<Vec<String>>,
}

/// Google OAuth 2.0 / OIDC tokens.
pub fn google(options: PresetOptions) -> JwtConfig {
    let issuer = "https://accounts.google.com".to_string();
    JwtConfig {
        jwks_uri: Some("https://www.googleapis.com/oauth2/v3/certs".to_string()),
        audience: options.audience,
        resource: options.resource,
        authorization_servers: vec![issuer.clone()],
        scopes_supported: options.scopes_supported,
        issuer,
    }
}

/// GitHub Actions OIDC tokens.
pub fn github_actions(options: PresetOptions) -> JwtConfig {
    let issuer = "https://token.actions.githubusercontent.com".to_string();
    JwtConfig {
        jwks_uri: Some(format!("{issuer}/.well-known/jwks")),
        audience: options.audience,
        resource: options.resource,
        authorization_servers: vec![issuer.clone()],
        scopes_supported: options.scopes_supported,
        issuer,
    }
}

/// Auth0 tenant tokens. The issuer is `https://{domain}/` and the JWKS
/// endpoint `{issuer}.well-known/jwks.json`.
pub fn auth0(domain: &str, options: PresetOptions) -> JwtConfig {
    let issuer = format!("https://{domain}/");
    JwtConfig {
        jwks_uri: Some(format!("{issuer}.well-known/jwks.json")),
        audience: options.audience,
        resource: options.resource,
        authorization_servers: vec![issuer.clone()],
        scopes_supported: options.scopes_supported,
        issuer,
    }
}

/// Generic OIDC issuer. The JWKS endpoint defaults to
/// `{issuer}/.well-known/jwks.json` when not given.
pub fn oidc(issuer: &str, jwks_uri: Option<String>, options: PresetOptions) -> JwtConfig {
    JwtConfig {
        issuer: issuer.to_string(),
        jwks_uri,
        audience: options.audience,
        resource: options.resource,
        authorization_servers: vec![issuer.to_string()],
        scopes_supported: options.scopes_supported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PresetOptions {
        PresetOptions {
            audience: "https://mcp.example.com".into(),
            resource: "https://mcp.example.com".into(),
            scopes_supported: None,
        }
    }

    #[test]
    fn auth0_issuer_has_trailing_slash() {
        let config = auth0("tenant.auth0.com", options());
        assert_eq!(config.issuer, "https://tenant.auth0.com/");
        assert_eq!(
            config.jwks_uri(),
            "https://tenant.auth0.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn google_pins_well_known_certs() {
        let config = google(options());
        assert_eq!(config.issuer, "https://accounts.google.com");
        assert_eq!(
            config.jwks_uri(),
            "https://www.googleapis.com/oauth2/v3/certs"
        );
    }

    #[test]
    fn oidc_derives_jwks_when_absent() {
        let config = oidc("https://sso.corp.example", None, options());
        assert_eq!(
            config.jwks_uri(),
            "https://sso.corp.example/.well-known/jwks.json"
        );
        assert_eq!(
            config.authorization_servers,
            vec!["https://sso.corp.example".to_string()]
        );
    }
}
