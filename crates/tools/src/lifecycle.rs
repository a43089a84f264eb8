//! Tools that operate on an existing Terraform project.

use std::sync::Arc;

use async_trait::async_trait;
use infrapilot_core::error::ToolError;
use infrapilot_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};
use tracing::info;

use crate::{ToolContext, bool_arg, required_str};

fn project_schema(extra: Option<(&str, Value)>) -> Value {
    let mut properties = json!({
        "project_name": {"type": "string", "description": "Project directory name (required)"}
    });
    if let Some((key, schema)) = extra {
        properties[key] = schema;
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["project_name"]
    })
}

/// `terraform plan -out=tfplan`.
pub struct TerraformPlanTool {
    ctx: Arc<ToolContext>,
}

impl TerraformPlanTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for TerraformPlanTool {
    fn name(&self) -> &str {
        "terraform_plan"
    }

    fn description(&self) -> &str {
        "Run terraform plan for a project"
    }

    fn parameters_schema(&self) -> Value {
        project_schema(None)
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;
        let project = required_str(&arguments, "project_name")?;
        let outcome = self.ctx.runner.plan(&project).await?;
        Ok(outcome.into_tool_result("plan"))
    }
}

/// `terraform apply`, preferring the saved plan.
pub struct TerraformApplyTool {
    ctx: Arc<ToolContext>,
}

impl TerraformApplyTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for TerraformApplyTool {
    fn name(&self) -> &str {
        "terraform_apply"
    }

    fn description(&self) -> &str {
        "Apply Terraform changes (will automatically approve if a plan file exists)"
    }

    fn parameters_schema(&self) -> Value {
        project_schema(Some((
            "auto_approve",
            json!({"type": "boolean", "description": "Auto-approve changes (default: true if tfplan exists)"}),
        )))
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;
        let project = required_str(&arguments, "project_name")?;
        let auto_approve = bool_arg(&arguments, "auto_approve", false);

        let saved_plan = self.ctx.runner.has_saved_plan(&project).await;
        if !saved_plan && !auto_approve {
            return Ok(ToolResult::failure(
                "No tfplan file found. Please run terraform_plan first.",
            ));
        }

        info!(project = %project, saved_plan, "Applying Terraform project");
        let outcome = self.ctx.runner.apply(&project, saved_plan).await?;
        Ok(outcome.into_tool_result("apply"))
    }
}

/// `terraform destroy`.
pub struct TerraformDestroyTool {
    ctx: Arc<ToolContext>,
}

impl TerraformDestroyTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for TerraformDestroyTool {
    fn name(&self) -> &str {
        "terraform_destroy"
    }

    fn description(&self) -> &str {
        "Destroy Terraform-managed infrastructure"
    }

    fn parameters_schema(&self) -> Value {
        project_schema(Some((
            "auto_approve",
            json!({"type": "boolean", "description": "Auto-approve destruction (default: false)"}),
        )))
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;
        let project = required_str(&arguments, "project_name")?;
        let auto_approve = bool_arg(&arguments, "auto_approve", false);

        info!(project = %project, auto_approve, "Destroying Terraform project");
        let outcome = self.ctx.runner.destroy(&project, auto_approve).await?;
        Ok(outcome.into_tool_result("destroy"))
    }
}

/// `terraform show -json`, returned as structured state.
pub struct InfrastructureStateTool {
    ctx: Arc<ToolContext>,
}

impl InfrastructureStateTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for InfrastructureStateTool {
    fn name(&self) -> &str {
        "get_infrastructure_state"
    }

    fn description(&self) -> &str {
        "Get current infrastructure state"
    }

    fn parameters_schema(&self) -> Value {
        project_schema(None)
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;
        let project = required_str(&arguments, "project_name")?;
        let outcome = self.ctx.runner.show(&project).await?;
        if !outcome.success {
            return Ok(outcome.into_tool_result("show"));
        }

        match serde_json::from_str::<Value>(&outcome.stdout) {
            Ok(state) => Ok(ToolResult::ok(json!({ "state": state }))),
            Err(_) => Ok(ToolResult::failure("Failed to parse state JSON")),
        }
    }
}
