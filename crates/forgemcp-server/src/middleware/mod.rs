//! The per-invocation middleware pipeline.
//!
//! Middlewares wrap tool invocations onion-style: each receives the
//! mutable context and a [`Next`] continuation, and may short-circuit by
//! not running it, enrich the context, or wrap the continuation in
//! pre/post logic. `Next` is consumed by value and cannot be cloned, so
//! invoking the rest of the pipeline twice is unrepresentable.
//!
//! The pipeline is assembled once, at server build time, in a fixed order:
//!
//! 1. rate limit (when configured)
//! 2. auth (when a provider is present)
//! 3. user middlewares, in registration order
//! 4. scope check (when any tool declares required scopes)
//! 5. validation (always present; a no-op for tools without a schema)
//! 6. backpressure (always)
//!
//! Changing this order is a breaking change.

mod auth;
mod backpressure;
mod rate_limit;
mod validation;

pub use auth::{AuthMiddleware, ScopeCheckMiddleware};
pub use backpressure::BackpressureMiddleware;
pub use rate_limit::{RateLimitKeyFn, RateLimitMiddleware, RateLimitMode};
pub use validation::ValidationMiddleware;

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{ServerError, ServerResult};
use crate::registry::{ToolOutput, ToolRegistry};

/// One layer of the invocation pipeline.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Process the invocation, calling `next.run(ctx)` to continue.
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput>;
}

/// Continuation of the pipeline. Consumed by [`run`](Self::run); the final
/// continuation dispatches to the registered tool handler.
pub struct Next<'a> {
    rest: &'a [Arc<dyn ToolMiddleware>],
    registry: &'a ToolRegistry,
}

impl Next<'_> {
    /// Advance the pipeline.
    pub async fn run(self, ctx: &mut InvocationContext) -> ServerResult<ToolOutput> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    rest,
                    registry: self.registry,
                };
                middleware.handle(ctx, next).await
            }
            None => {
                let entry =
                    self.registry
                        .get(&ctx.tool_name)
                        .ok_or_else(|| ServerError::UnknownTool {
                            name: ctx.tool_name.clone(),
                        })?;
                let args = ctx.args.clone();
                entry.handler.call(args, ctx).await
            }
        }
    }
}

/// The assembled pipeline for tool calls.
pub struct ToolPipeline {
    middlewares: Vec<Arc<dyn ToolMiddleware>>,
    registry: Arc<ToolRegistry>,
}

impl std::fmt::Debug for ToolPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPipeline")
            .field("layers", &self.middlewares.len())
            .finish()
    }
}

impl ToolPipeline {
    /// Assemble the pipeline in the fixed order. `user_middlewares` keep
    /// their registration order between auth and the scope check.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        registry: Arc<ToolRegistry>,
        rate_limit: Option<Arc<RateLimitMiddleware>>,
        auth: Option<Arc<AuthMiddleware>>,
        user_middlewares: Vec<Arc<dyn ToolMiddleware>>,
        scope_check: Option<Arc<ScopeCheckMiddleware>>,
        validation: Option<Arc<ValidationMiddleware>>,
        backpressure: Arc<BackpressureMiddleware>,
    ) -> Self {
        let mut middlewares: Vec<Arc<dyn ToolMiddleware>> = Vec::new();
        if let Some(mw) = rate_limit {
            middlewares.push(mw);
        }
        if let Some(mw) = auth {
            middlewares.push(mw);
        }
        middlewares.extend(user_middlewares);
        if let Some(mw) = scope_check {
            middlewares.push(mw);
        }
        if let Some(mw) = validation {
            middlewares.push(mw);
        }
        middlewares.push(backpressure);

        Self {
            middlewares,
            registry,
        }
    }

    /// Run an invocation through the pipeline to the handler.
    pub async fn run(&self, ctx: &mut InvocationContext) -> ServerResult<ToolOutput> {
        Next {
            rest: &self.middlewares,
            registry: self.registry.as_ref(),
        }
        .run(ctx)
        .await
    }

    /// Number of layers, handler excluded.
    pub fn layers(&self) -> usize {
        self.middlewares.len()
    }
}
