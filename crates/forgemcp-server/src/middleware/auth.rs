//! Authentication and scope-check middlewares.

use async_trait::async_trait;
use forgemcp_auth::{extract_bearer, AuthError, AuthProvider};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{ServerError, ServerResult};
use crate::middleware::{Next, ToolMiddleware};
use crate::registry::ToolOutput;
use crate::telemetry;

/// Bearer verification around tool calls.
///
/// Skipped entirely when the invocation has no HTTP request attached — the
/// stdio transport is local and auth does not apply there.
pub struct AuthMiddleware {
    provider: Arc<dyn AuthProvider>,
}

impl AuthMiddleware {
    /// Create the middleware.
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ToolMiddleware for AuthMiddleware {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let Some(request) = &ctx.request else {
            return next.run(ctx).await;
        };

        let metadata_url = self.provider.resource_metadata().metadata_url();

        let token = request
            .header("authorization")
            .and_then(extract_bearer)
            .map(str::to_string);
        let Some(token) = token else {
            telemetry::record_auth_event("reject");
            return Err(AuthError::missing_token(Some(metadata_url)).into());
        };

        let Some(info) = self.provider.verify_token(&token).await else {
            telemetry::record_auth_event("reject");
            return Err(AuthError::invalid_token(Some(metadata_url)).into());
        };

        telemetry::record_auth_event("verify");
        ctx.set_auth(info)?;
        ctx.resource_metadata_url = Some(metadata_url);
        next.run(ctx).await
    }
}

/// Per-tool scope enforcement.
///
/// Built from a map computed at pipeline build time by scanning every
/// registered tool's required scopes.
pub struct ScopeCheckMiddleware {
    scopes: HashMap<String, Vec<String>>,
}

impl ScopeCheckMiddleware {
    /// Create the middleware from the registry's scope map.
    pub fn new(scopes: HashMap<String, Vec<String>>) -> Self {
        Self { scopes }
    }
}

#[async_trait]
impl ToolMiddleware for ScopeCheckMiddleware {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let Some(required) = self.scopes.get(&ctx.tool_name).filter(|s| !s.is_empty()) else {
            return next.run(ctx).await;
        };

        match ctx.auth() {
            Some(info) => {
                let missing = info.missing_scopes(required);
                if missing.is_empty() {
                    next.run(ctx).await
                } else {
                    telemetry::record_auth_event("reject");
                    Err(AuthError::insufficient_scope(
                        missing,
                        ctx.resource_metadata_url.clone(),
                    )
                    .into())
                }
            }
            // Local transport: no request means auth is not applicable.
            None if ctx.request.is_none() => next.run(ctx).await,
            // An HTTP call reached the scope check without auth info: the
            // pipeline is miswired, which must fail loudly, not as a 401.
            None => Err(ServerError::Pipeline(format!(
                "scope check for tool '{}' requires the auth middleware on HTTP calls",
                ctx.tool_name
            ))),
        }
    }
}
