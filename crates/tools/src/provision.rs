//! `create_*` tools: render a Terraform project and run `terraform init`.
//!
//! None of these touch AWS resources directly. They leave an initialized
//! project behind and tell the model which project to plan next.

use std::io::{Cursor, Write};
use std::sync::Arc;

use async_trait::async_trait;
use infrapilot_core::error::ToolError;
use infrapilot_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::templates;
use crate::{ToolContext, bool_arg, required_str, str_arg};

const PREVIEW_CHARS: usize = 500;

/// The kinds of resource the agent can scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ec2Instance,
    S3Bucket,
    Vpc,
    RdsInstance,
    LambdaFunction,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        Self::Ec2Instance,
        Self::S3Bucket,
        Self::Vpc,
        Self::RdsInstance,
        Self::LambdaFunction,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Ec2Instance => "create_ec2_instance",
            Self::S3Bucket => "create_s3_bucket",
            Self::Vpc => "create_vpc",
            Self::RdsInstance => "create_rds_instance",
            Self::LambdaFunction => "create_lambda_function",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Ec2Instance => "Create an EC2 instance using Terraform",
            Self::S3Bucket => "Create an S3 bucket using Terraform",
            Self::Vpc => "Create a VPC with subnets using Terraform",
            Self::RdsInstance => "Create an RDS PostgreSQL instance using Terraform",
            Self::LambdaFunction => "Create a Lambda function using Terraform",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ec2Instance => "EC2 instance",
            Self::S3Bucket => "S3 bucket",
            Self::Vpc => "VPC",
            Self::RdsInstance => "RDS instance",
            Self::LambdaFunction => "Lambda function",
        }
    }

    /// IAM action simulated before the project is written, if any.
    pub fn required_permission(self) -> Option<&'static str> {
        match self {
            Self::Ec2Instance => Some("ec2:RunInstances"),
            Self::S3Bucket => Some("s3:CreateBucket"),
            Self::Vpc => Some("ec2:CreateVpc"),
            Self::RdsInstance | Self::LambdaFunction => None,
        }
    }

    fn schema(self) -> Value {
        let region = json!({"type": "string", "description": "AWS region (default: us-east-1)"});
        match self {
            Self::Ec2Instance => json!({
                "type": "object",
                "properties": {
                    "instance_type": {"type": "string", "description": "EC2 instance type (default: t2.micro)"},
                    "region": region,
                    "ami_id": {"type": "string", "description": "AMI ID (optional)"}
                }
            }),
            Self::S3Bucket => json!({
                "type": "object",
                "properties": {
                    "bucket_name": {"type": "string", "description": "S3 bucket name (required)"},
                    "region": region,
                    "versioning": {"type": "boolean", "description": "Enable versioning (default: true)"}
                },
                "required": ["bucket_name"]
            }),
            Self::Vpc => json!({
                "type": "object",
                "properties": {
                    "cidr_block": {"type": "string", "description": "VPC CIDR block (default: 10.0.0.0/16)"},
                    "region": region
                }
            }),
            Self::RdsInstance => json!({
                "type": "object",
                "properties": {
                    "db_name": {"type": "string", "description": "Database name (required)"},
                    "instance_class": {"type": "string", "description": "RDS instance class (default: db.t3.micro)"},
                    "region": region
                },
                "required": ["db_name"]
            }),
            Self::LambdaFunction => json!({
                "type": "object",
                "properties": {
                    "function_name": {"type": "string", "description": "Lambda function name (required)"},
                    "region": region
                },
                "required": ["function_name"]
            }),
        }
    }
}

/// A rendered project ready to be written.
struct Rendered {
    project_name: String,
    main_tf: String,
    /// Whether this project ships the Lambda payload archive
    lambda_payload: bool,
}

/// Tool that scaffolds one [`ResourceKind`].
pub struct ProvisionTool {
    kind: ResourceKind,
    ctx: Arc<ToolContext>,
}

impl ProvisionTool {
    pub fn new(kind: ResourceKind, ctx: Arc<ToolContext>) -> Self {
        Self { kind, ctx }
    }

    fn render(&self, args: &Value) -> Result<Rendered, ToolError> {
        let region = hcl_arg(args, "region")?.unwrap_or_else(|| self.ctx.default_region.clone());

        let rendered = match self.kind {
            ResourceKind::Ec2Instance => {
                let instance_type = hcl_arg(args, "instance_type")?.unwrap_or_else(|| "t2.micro".into());
                let ami_id = hcl_arg(args, "ami_id")?;
                Rendered {
                    project_name: format!("ec2_{instance_type}_{region}"),
                    main_tf: templates::ec2_instance(&instance_type, ami_id.as_deref(), &region),
                    lambda_payload: false,
                }
            }
            ResourceKind::S3Bucket => {
                let bucket = hcl_safe("bucket_name", required_str(args, "bucket_name")?)?;
                Rendered {
                    project_name: format!("s3_{bucket}"),
                    main_tf: templates::s3_bucket(&bucket, &region, bool_arg(args, "versioning", true)),
                    lambda_payload: false,
                }
            }
            ResourceKind::Vpc => {
                let cidr = hcl_arg(args, "cidr_block")?.unwrap_or_else(|| "10.0.0.0/16".into());
                Rendered {
                    project_name: format!("vpc_{region}"),
                    main_tf: templates::vpc_network(&cidr, &region),
                    lambda_payload: false,
                }
            }
            ResourceKind::RdsInstance => {
                let db_name = hcl_safe("db_name", required_str(args, "db_name")?)?;
                let class = hcl_arg(args, "instance_class")?.unwrap_or_else(|| "db.t3.micro".into());
                Rendered {
                    project_name: format!("rds_{db_name}"),
                    main_tf: templates::rds_instance(&db_name, &class, &region),
                    lambda_payload: false,
                }
            }
            ResourceKind::LambdaFunction => {
                let function_name = hcl_safe("function_name", required_str(args, "function_name")?)?;
                Rendered {
                    project_name: format!("lambda_{function_name}"),
                    main_tf: templates::lambda_function(&function_name, &region),
                    lambda_payload: true,
                }
            }
        };
        Ok(rendered)
    }
}

#[async_trait]
impl Tool for ProvisionTool {
    fn name(&self) -> &str {
        self.kind.tool_name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn parameters_schema(&self) -> Value {
        self.kind.schema()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ctx.authenticate().await?;
        let rendered = self.render(&arguments)?;
        if let Some(action) = self.kind.required_permission() {
            self.ctx.authorize(self.name(), action).await?;
        }

        let project = rendered.project_name.as_str();
        self.ctx.runner.write_project(project, &rendered.main_tf).await?;
        if rendered.lambda_payload {
            let archive = lambda_payload().map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("failed to build Lambda payload: {e}"),
            })?;
            self.ctx
                .runner
                .write_file(project, templates::LAMBDA_PAYLOAD, &archive)
                .await?;
        }

        let init = self.ctx.runner.init(project).await?;
        if !init.success {
            return Ok(init.into_tool_result("init"));
        }

        info!(tool = self.name(), project, "Terraform project initialized");
        Ok(ToolResult::ok(json!({
            "project_name": project,
            "message": format!(
                "{} project created. Run terraform_plan with project_name='{project}' to continue.",
                self.kind.label()
            ),
            "config_preview": preview(&rendered.main_tf),
        })))
    }
}

/// Values are spliced into quoted HCL strings, so anything that could end
/// the string or start an interpolation is refused.
fn hcl_safe(key: &str, value: String) -> Result<String, ToolError> {
    if value.chars().any(|c| matches!(c, '"' | '\\' | '$' | '{' | '}') || c.is_control()) {
        return Err(ToolError::InvalidArguments(format!(
            "{key} contains characters not allowed in a resource name: {value:?}"
        )));
    }
    Ok(value)
}

fn hcl_arg(args: &Value, key: &str) -> Result<Option<String>, ToolError> {
    str_arg(args, key).map(|v| hcl_safe(key, v)).transpose()
}

fn preview(config: &str) -> String {
    let mut out: String = config.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Zip archive holding the stub handler as `index.py`.
fn lambda_payload() -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file("index.py", options)?;
    writer.write_all(templates::LAMBDA_HANDLER_SOURCE.as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticAccess;
    use crate::test_support::echo_context;

    #[test]
    fn every_kind_has_a_distinct_tool_name() {
        let mut names: Vec<_> = ResourceKind::ALL.iter().map(|k| k.tool_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn preview_is_truncated() {
        let long = "x".repeat(800);
        let p = preview(&long);
        assert_eq!(p.len(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn lambda_payload_is_a_zip() {
        let bytes = lambda_payload().unwrap();
        assert_eq!(&bytes[..2], b"PK");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.by_index(0).unwrap().name(), "index.py");
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::S3Bucket,
            echo_context(dir.path(), StaticAccess::allow_all()),
        );
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("bucket_name is required"));
    }

    #[tokio::test]
    async fn names_that_would_break_the_template_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = echo_context(dir.path(), StaticAccess::allow_all());
        let cases = [
            (ResourceKind::S3Bucket, json!({"bucket_name": "logs\" acl = \"public-read"})),
            (ResourceKind::RdsInstance, json!({"db_name": "orders${file(\"/etc/passwd\")}"})),
            (ResourceKind::LambdaFunction, json!({"function_name": "resize\\"})),
            (ResourceKind::Vpc, json!({"cidr_block": "10.0.0.0/16\" }"})),
        ];
        for (kind, args) in cases {
            let tool = ProvisionTool::new(kind, ctx.clone());
            let err = tool.execute(args).await.unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)), "{err}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unauthenticated_caller_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::Vpc,
            echo_context(dir.path(), StaticAccess::unauthenticated()),
        );
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("User not authenticated"));
        assert!(!dir.path().join("vpc_us-east-1").exists());
    }

    #[tokio::test]
    async fn denied_permission_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::S3Bucket,
            echo_context(dir.path(), StaticAccess::allow_all().deny("s3:CreateBucket")),
        );
        let err = tool.execute(json!({"bucket_name": "logs"})).await.unwrap_err();
        assert!(err.to_string().contains("User lacks s3:CreateBucket permission"));
        assert!(!dir.path().join("s3_logs").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn creates_and_initializes_s3_project() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::S3Bucket,
            echo_context(dir.path(), StaticAccess::allow_all()),
        );
        let result = tool
            .execute(json!({"bucket_name": "logs", "region": "eu-west-1", "versioning": false}))
            .await
            .unwrap();
        assert!(result.success);

        let payload = result.payload.unwrap();
        assert_eq!(payload["project_name"], "s3_logs");
        assert!(payload["message"].as_str().unwrap().starts_with("S3 bucket project created."));
        assert!(payload["message"].as_str().unwrap().contains("project_name='s3_logs'"));

        let main_tf = std::fs::read_to_string(dir.path().join("s3_logs/main.tf")).unwrap();
        assert!(main_tf.contains(r#"bucket = "logs""#));
        assert!(!main_tf.contains("aws_s3_bucket_versioning"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ec2_project_name_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::Ec2Instance,
            echo_context(dir.path(), StaticAccess::allow_all()),
        );
        let result = tool.execute(json!({})).await.unwrap();
        assert_eq!(result.payload.unwrap()["project_name"], "ec2_t2.micro_us-east-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lambda_project_ships_payload() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProvisionTool::new(
            ResourceKind::LambdaFunction,
            echo_context(dir.path(), StaticAccess::allow_all()),
        );
        let result = tool.execute(json!({"function_name": "resize"})).await.unwrap();
        assert!(result.success);
        assert!(dir.path().join("lambda_resize").join(templates::LAMBDA_PAYLOAD).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_init_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ToolContext::new(
            crate::TerraformRunner::new("false", dir.path()),
            Arc::new(StaticAccess::allow_all()),
        ));
        let tool = ProvisionTool::new(ResourceKind::RdsInstance, ctx);
        let result = tool.execute(json!({"db_name": "orders"})).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("terraform init failed"));
    }
}
