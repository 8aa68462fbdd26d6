//! Deterministic auth provider for tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{AuthInfo, AuthProvider, ResourceMetadata};

/// An [`AuthProvider`] backed by a fixed token table, for exercising auth
/// and scope paths without a real identity provider.
#[derive(Debug)]
pub struct MockAuthProvider {
    tokens: RwLock<HashMap<String, AuthInfo>>,
    allow_all: RwLock<Option<AuthInfo>>,
    metadata: ResourceMetadata,
}

impl MockAuthProvider {
    /// Provider with RFC 9728 metadata for the given resource.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            allow_all: RwLock::new(None),
            metadata: ResourceMetadata::new(
                resource,
                vec!["https://issuer.test".to_string()],
                None,
            ),
        }
    }

    /// Accept a specific token as the given identity.
    pub fn accept(self, token: impl Into<String>, info: AuthInfo) -> Self {
        self.tokens.write().insert(token.into(), info);
        self
    }

    /// Accept any token as the given identity.
    pub fn allow_all(self, info: AuthInfo) -> Self {
        *self.allow_all.write() = Some(info);
        self
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn verify_token(&self, token: &str) -> Option<AuthInfo> {
        if let Some(info) = self.tokens.read().get(token) {
            return Some(info.clone());
        }
        self.allow_all.read().clone()
    }

    fn resource_metadata(&self) -> ResourceMetadata {
        self.metadata.clone()
    }
}
