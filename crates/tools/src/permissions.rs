//! `get_user_permissions`: who the caller is and where they can deploy.

use std::sync::Arc;

use async_trait::async_trait;
use infrapilot_core::error::ToolError;
use infrapilot_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};

use crate::ToolContext;

pub struct UserPermissionsTool {
    ctx: Arc<ToolContext>,
}

impl UserPermissionsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for UserPermissionsTool {
    fn name(&self) -> &str {
        "get_user_permissions"
    }

    fn description(&self) -> &str {
        "Get current AWS user permissions and info"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;

        let user_info = match self.ctx.access.identity().await {
            Ok(identity) => json!({
                "account_id": identity.account_id,
                "user_arn": identity.user_arn,
                "user_id": identity.user_id,
            }),
            Err(e) => json!({
                "account_id": "unknown",
                "user_arn": "unknown",
                "user_id": "unknown",
                "error": e.to_string(),
            }),
        };
        let regions = self.ctx.access.allowed_regions().await;

        Ok(ToolResult::ok(json!({
            "user_info": user_info,
            "allowed_regions": regions,
        })))
    }
}
