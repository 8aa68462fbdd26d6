//! Per-tool rate limiting middleware.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{ServerError, ServerResult};
use crate::limits::SlidingWindowLimiter;
use crate::middleware::{Next, ToolMiddleware};
use crate::registry::ToolOutput;
use crate::telemetry;

/// How the middleware reacts to a closed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitMode {
    /// Fail with a retry hint
    Reject,
    /// Block until a slot opens
    Wait,
}

/// Computes the limiter key from the invocation. Defaults to the literal
/// `"default"` — one shared window for every call.
pub type RateLimitKeyFn = dyn Fn(&InvocationContext) -> String + Send + Sync;

/// Sliding-window rate limiting around tool calls.
pub struct RateLimitMiddleware {
    limiter: Arc<SlidingWindowLimiter>,
    mode: RateLimitMode,
    key_fn: Option<Arc<RateLimitKeyFn>>,
}

impl RateLimitMiddleware {
    /// Create the middleware.
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        mode: RateLimitMode,
        key_fn: Option<Arc<RateLimitKeyFn>>,
    ) -> Self {
        Self {
            limiter,
            mode,
            key_fn,
        }
    }

    fn key(&self, ctx: &InvocationContext) -> String {
        match &self.key_fn {
            Some(f) => f(ctx),
            None => "default".to_string(),
        }
    }
}

#[async_trait]
impl ToolMiddleware for RateLimitMiddleware {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let key = self.key(ctx);
        match self.mode {
            RateLimitMode::Reject => {
                if !self.limiter.check_limit(&key) {
                    let retry_after_ms = self.limiter.time_until_slot(&key);
                    telemetry::record_rate_limited("tool");
                    let seconds = retry_after_ms.div_ceil(1000).max(1);
                    return Err(ServerError::RateLimited {
                        message: format!("Rate limit exceeded. Retry after {seconds}s"),
                        retry_after_ms,
                    });
                }
            }
            RateLimitMode::Wait => self.limiter.wait_for_slot(&key).await,
        }
        next.run(ctx).await
    }
}
