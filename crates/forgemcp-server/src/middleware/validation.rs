//! Schema validation middleware.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::ServerResult;
use crate::middleware::{Next, ToolMiddleware};
use crate::registry::ToolOutput;
use crate::validation::SchemaValidator;

/// Validates tool arguments against their registered schema, applying
/// top-level defaults into the context's args.
pub struct ValidationMiddleware {
    validator: Arc<SchemaValidator>,
}

impl ValidationMiddleware {
    /// Create the middleware.
    pub fn new(validator: Arc<SchemaValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl ToolMiddleware for ValidationMiddleware {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let tool_name = ctx.tool_name.clone();
        self.validator.validate_or_throw(&tool_name, &mut ctx.args)?;
        next.run(ctx).await
    }
}
