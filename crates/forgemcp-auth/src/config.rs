//! Auth configuration loading.
//!
//! Settings come from two sources with strict priority: environment
//! variables override the YAML file, which overrides nothing (auth simply
//! stays disabled). Validation is fail-fast with a distinct message per
//! mistake so a misconfigured deployment dies loudly at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::jwt::JwtConfig;
use crate::presets::{self, PresetOptions};

/// Configuration errors, each with a distinct message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The provider string is not one of the known providers
    #[error("Unknown auth provider '{0}': expected github, google, auth0 or oidc")]
    UnknownProvider(String),
    /// `audience` is required for every provider
    #[error("Auth config missing required 'audience'")]
    MissingAudience,
    /// `resource` is required for every provider
    #[error("Auth config missing required 'resource'")]
    MissingResource,
    /// auth0 requires a tenant domain
    #[error("Auth provider 'auth0' requires 'domain'")]
    MissingDomain,
    /// oidc requires an issuer
    #[error("Auth provider 'oidc' requires 'issuer'")]
    MissingIssuer,
    /// The YAML file exists but could not be parsed
    #[error("Failed to parse auth config file: {0}")]
    Parse(String),
}

/// Raw auth settings prior to validation. All fields optional so the env
/// and YAML layers can be merged field-wise.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Provider kind: `github`, `google`, `auth0` or `oidc`
    pub provider: Option<String>,
    /// Expected `aud` claim
    pub audience: Option<String>,
    /// Protected resource identifier
    pub resource: Option<String>,
    /// Auth0 tenant domain
    pub domain: Option<String>,
    /// OIDC issuer
    pub issuer: Option<String>,
    /// Explicit JWKS endpoint
    pub jwks_uri: Option<String>,
    /// Scopes advertised in resource metadata
    pub scopes_supported: Option<Vec<String>>,
}

/// Top-level YAML document shape: `auth:` section.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auth: Option<AuthSettings>,
}

impl AuthSettings {
    /// Read settings from `MCP_AUTH_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            provider: var("MCP_AUTH_PROVIDER"),
            audience: var("MCP_AUTH_AUDIENCE"),
            resource: var("MCP_AUTH_RESOURCE"),
            domain: var("MCP_AUTH_DOMAIN"),
            issuer: var("MCP_AUTH_ISSUER"),
            jwks_uri: var("MCP_AUTH_JWKS_URI"),
            scopes_supported: var("MCP_AUTH_SCOPES").map(|scopes| {
                scopes
                    .split(' ')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
        }
    }

    /// Read settings from a YAML file. A missing file is not an error.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let file: ConfigFile =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(file.auth.unwrap_or_default())
    }

    /// Merge two layers; fields set in `self` win.
    pub fn merged_over(self, lower: Self) -> Self {
        Self {
            provider: self.provider.or(lower.provider),
            audience: self.audience.or(lower.audience),
            resource: self.resource.or(lower.resource),
            domain: self.domain.or(lower.domain),
            issuer: self.issuer.or(lower.issuer),
            jwks_uri: self.jwks_uri.or(lower.jwks_uri),
            scopes_supported: self.scopes_supported.or(lower.scopes_supported),
        }
    }

    /// Load the effective settings: environment over YAML.
    pub fn load(yaml_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::from_env().merged_over(Self::from_yaml_file(yaml_path)?))
    }

    /// Validate and convert into a provider configuration.
    ///
    /// Returns `Ok(None)` when no provider is configured (auth disabled).
    pub fn into_jwt_config(self) -> Result<Option<JwtConfig>, ConfigError> {
        let Some(provider) = self.provider else {
            return Ok(None);
        };

        let audience = self.audience.ok_or(ConfigError::MissingAudience)?;
        let resource = self.resource.ok_or(ConfigError::MissingResource)?;
        let options = PresetOptions {
            audience,
            resource,
            scopes_supported: self.scopes_supported,
        };

        let mut config = match provider.as_str() {
            "google" => presets::google(options),
            "github" => presets::github_actions(options),
            "auth0" => {
                let domain = self.domain.ok_or(ConfigError::MissingDomain)?;
                presets::auth0(&domain, options)
            }
            "oidc" => {
                let issuer = self.issuer.ok_or(ConfigError::MissingIssuer)?;
                presets::oidc(&issuer, self.jwks_uri.clone(), options)
            }
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        };

        // An explicit JWKS URI beats any preset-derived one
        if let Some(jwks_uri) = self.jwks_uri {
            config.jwks_uri = Some(jwks_uri);
        }
        Ok(Some(config))
    }
}
