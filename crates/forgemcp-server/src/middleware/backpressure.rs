//! Backpressure middleware.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::ServerResult;
use crate::middleware::{Next, ToolMiddleware};
use crate::queue::RequestQueue;
use crate::registry::ToolOutput;

/// Innermost built-in layer: holds a queue slot for the duration of the
/// handler. The permit releases on drop, so error paths and panics release
/// exactly once.
pub struct BackpressureMiddleware {
    queue: Arc<RequestQueue>,
}

impl BackpressureMiddleware {
    /// Create the middleware.
    pub fn new(queue: Arc<RequestQueue>) -> Self {
        Self { queue }
    }

    /// The underlying queue, for metrics reads.
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }
}

#[async_trait]
impl ToolMiddleware for BackpressureMiddleware {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let _permit = self.queue.acquire().await?;
        next.run(ctx).await
    }
}
