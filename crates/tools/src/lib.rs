//! Infrastructure tools for InfraPilot.
//!
//! Tools give the agent the ability to provision AWS resources through
//! Terraform: generate a project, plan it, apply it, inspect or destroy it,
//! and report what the caller is allowed to do.
//!
//! Tools are grouped into named profiles (see [`profile`]); a run binds one
//! profile's registry to the model.

pub mod aws;
pub mod lifecycle;
pub mod permissions;
pub mod profile;
pub mod provision;
pub mod runner;
pub mod templates;

use std::sync::Arc;

use infrapilot_config::TerraformConfig;
use infrapilot_core::error::ToolError;
use infrapilot_core::tool::ToolRegistry;
use tracing::debug;

pub use aws::{AccessChecker, AwsCliAccess, CallerIdentity, StaticAccess};
pub use profile::{ToolProfile, ToolProfiles};
pub use provision::{ProvisionTool, ResourceKind};
pub use runner::{CommandOutcome, TerraformRunner};

/// Shared state every infrastructure tool works against.
pub struct ToolContext {
    pub runner: TerraformRunner,
    pub access: Arc<dyn AccessChecker>,
    pub default_region: String,
    /// Require an AWS identity and simulate IAM permissions before acting
    pub check_permissions: bool,
}

impl ToolContext {
    pub fn new(runner: TerraformRunner, access: Arc<dyn AccessChecker>) -> Self {
        Self {
            runner,
            access,
            default_region: aws::FALLBACK_REGION.to_string(),
            check_permissions: true,
        }
    }

    /// Context for the configured workspace, backed by the `aws` CLI.
    pub fn from_config(config: &TerraformConfig) -> Self {
        let access: Arc<dyn AccessChecker> = if config.check_permissions {
            Arc::new(AwsCliAccess::new(&config.aws_cli))
        } else {
            Arc::new(StaticAccess::allow_all())
        };
        Self {
            runner: TerraformRunner::from_config(config),
            access,
            default_region: config.default_region.clone(),
            check_permissions: config.check_permissions,
        }
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn with_permission_checks(mut self, enabled: bool) -> Self {
        self.check_permissions = enabled;
        self
    }

    /// Fail unless the caller has AWS credentials.
    pub async fn authenticate(&self) -> Result<(), ToolError> {
        if self.check_permissions {
            self.access.identity().await?;
        }
        Ok(())
    }

    /// Fail unless the caller may perform `action`.
    pub async fn authorize(&self, tool_name: &str, action: &str) -> Result<(), ToolError> {
        if !self.check_permissions {
            return Ok(());
        }
        debug!(tool = tool_name, action, "Checking IAM permission");
        if self.access.check_permission(action).await {
            Ok(())
        } else {
            Err(ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: format!("User lacks {action} permission"),
            })
        }
    }
}

/// Registry holding every infrastructure tool.
pub fn infra_registry(ctx: Arc<ToolContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in ResourceKind::ALL {
        registry.register(Box::new(ProvisionTool::new(kind, ctx.clone())));
    }
    registry.register(Box::new(lifecycle::TerraformPlanTool::new(ctx.clone())));
    registry.register(Box::new(lifecycle::TerraformApplyTool::new(ctx.clone())));
    registry.register(Box::new(lifecycle::TerraformDestroyTool::new(ctx.clone())));
    registry.register(Box::new(lifecycle::InfrastructureStateTool::new(ctx.clone())));
    registry.register(Box::new(permissions::UserPermissionsTool::new(ctx)));
    registry
}

// --- Argument helpers ---

/// Non-blank string argument.
pub(crate) fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub(crate) fn required_str(args: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    str_arg(args, key).ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

/// Boolean argument; models sometimes send "true"/"false" strings.
pub(crate) fn bool_arg(args: &serde_json::Value, key: &str, default: bool) -> bool {
    match args.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => default,
        },
        _ => default,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infra_registry_has_ten_tools() {
        let dir = tempfile::tempdir().unwrap();
        let registry = infra_registry(test_support::echo_context(dir.path(), StaticAccess::allow_all()));
        assert_eq!(
            registry.names(),
            vec![
                "create_ec2_instance",
                "create_lambda_function",
                "create_rds_instance",
                "create_s3_bucket",
                "create_vpc",
                "get_infrastructure_state",
                "get_user_permissions",
                "terraform_apply",
                "terraform_destroy",
                "terraform_plan",
            ]
        );
    }

    #[test]
    fn argument_helpers() {
        let args = json!({"a": "  x ", "b": "", "flag": "TRUE", "n": 3});
        assert_eq!(str_arg(&args, "a").as_deref(), Some("x"));
        assert!(str_arg(&args, "b").is_none());
        assert!(required_str(&args, "missing").unwrap_err().to_string().contains("missing is required"));
        assert!(bool_arg(&args, "flag", false));
        assert!(bool_arg(&args, "n", true));
        assert!(!bool_arg(&args, "absent", false));
    }

    #[tokio::test]
    async fn authorization_can_be_disabled() {
        let ctx = ToolContext::new(
            TerraformRunner::new("terraform", "/tmp"),
            Arc::new(StaticAccess::unauthenticated()),
        );
        assert!(ctx.authenticate().await.is_err());
        assert!(ctx.authorize("create_vpc", "ec2:CreateVpc").await.is_err());

        let ctx = ctx.with_permission_checks(false);
        assert!(ctx.authenticate().await.is_ok());
        assert!(ctx.authorize("create_vpc", "ec2:CreateVpc").await.is_ok());
    }
}
