//! Bearer-token authentication for forgemcp.
//!
//! The subsystem has four tightly coupled concerns: bearer extraction from
//! the `Authorization` header, JWT verification against a remote JWKS,
//! scope data for the server's enforcement middleware, and a bounded
//! TTL-capped token cache that makes per-call verification feasible.
//!
//! The default provider is [`JwtAuthProvider`]; [`presets`] pre-fills
//! issuer and JWKS locations for common identity providers, and
//! [`config`] loads provider settings from environment variables and an
//! optional YAML file.
//!
//! # Example
//!
//! ```rust,no_run
//! use forgemcp_auth::{presets, JwtAuthProvider, PresetOptions};
//!
//! let config = presets::auth0(
//!     "my-tenant.auth0.com",
//!     PresetOptions {
//!         audience: "https://mcp.example.com".into(),
//!         resource: "https://mcp.example.com".into(),
//!         scopes_supported: Some(vec!["read".into(), "write".into()]),
//!     },
//! );
//! let provider = JwtAuthProvider::new(config);
//! ```

pub mod bearer;
pub mod cache;
pub mod config;
pub mod jwks;
pub mod jwt;
pub mod presets;
pub mod testing;
pub mod types;

pub use bearer::extract_bearer;
pub use cache::TokenCache;
pub use config::{AuthSettings, ConfigError};
pub use jwks::JwksClient;
pub use jwt::{JwtAuthProvider, JwtConfig};
pub use presets::PresetOptions;
pub use types::{AuthError, AuthErrorCode, AuthInfo, AuthProvider, ResourceMetadata};
