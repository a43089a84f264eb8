//! AWS identity and permission checks.
//!
//! The tools only need three answers from AWS: who is calling, may they
//! perform an action, and which regions can they use. [`AwsCliAccess`] gets
//! them from the `aws` CLI so the process shares the user's profile setup.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use infrapilot_core::error::ToolError;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Message shown when no AWS identity could be resolved.
pub const NOT_AUTHENTICATED: &str = "User not authenticated. Please ensure you are logged in via AWS CLI and have the correct AWS_PROFILE set.";

/// Region list used when the real one cannot be fetched.
pub const FALLBACK_REGION: &str = "us-east-1";

const CLI_TIMEOUT: Duration = Duration::from_secs(30);

/// The principal behind the current AWS credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub user_arn: String,
    pub user_id: String,
}

/// Source of identity and authorization answers.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Resolve the caller; errors mean no usable credentials.
    async fn identity(&self) -> Result<CallerIdentity, ToolError>;

    /// Whether the caller may perform `action` (e.g. `s3:CreateBucket`).
    async fn check_permission(&self, action: &str) -> bool;

    /// Regions the caller can use.
    async fn allowed_regions(&self) -> Vec<String>;
}

/// [`AccessChecker`] backed by the `aws` command line tool.
pub struct AwsCliAccess {
    binary: String,
    identity: OnceCell<CallerIdentity>,
}

impl AwsCliAccess {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            identity: OnceCell::new(),
        }
    }

    async fn aws_json(&self, args: &[&str]) -> Result<serde_json::Value, String> {
        let child = Command::new(&self.binary)
            .args(args)
            .args(["--output", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.binary))?;

        let output = tokio::time::timeout(CLI_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| format!("aws {} timed out", args.join(" ")))?
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        serde_json::from_slice(&output.stdout).map_err(|e| e.to_string())
    }

    async fn fetch_identity(&self) -> Result<CallerIdentity, ToolError> {
        let profile = std::env::var("AWS_PROFILE").unwrap_or_else(|_| "default".into());
        info!(%profile, "Resolving AWS caller identity");

        let body = self.aws_json(&["sts", "get-caller-identity"]).await.map_err(|reason| {
            warn!(%reason, "Failed to resolve AWS identity");
            ToolError::PermissionDenied {
                tool_name: "aws sts".into(),
                reason: NOT_AUTHENTICATED.into(),
            }
        })?;
        let identity = parse_caller_identity(&body).ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "aws sts".into(),
            reason: "unexpected get-caller-identity output".into(),
        })?;
        info!(arn = %identity.user_arn, "AWS identity resolved");
        Ok(identity)
    }
}

#[async_trait]
impl AccessChecker for AwsCliAccess {
    async fn identity(&self) -> Result<CallerIdentity, ToolError> {
        // Failed lookups are retried on the next call.
        self.identity
            .get_or_try_init(|| self.fetch_identity())
            .await
            .cloned()
    }

    async fn check_permission(&self, action: &str) -> bool {
        let arn = match self.identity().await {
            Ok(identity) => identity.user_arn,
            Err(_) => return false,
        };

        let result = self
            .aws_json(&[
                "iam",
                "simulate-principal-policy",
                "--policy-source-arn",
                &arn,
                "--action-names",
                action,
                "--resource-arns",
                "*",
            ])
            .await;

        match result {
            Ok(body) => evaluation_allows(&body),
            Err(reason) => {
                // The simulator itself is often not permitted; do not block on it.
                warn!(action, %reason, "Permission check failed, allowing");
                true
            }
        }
    }

    async fn allowed_regions(&self) -> Vec<String> {
        match self.aws_json(&["ec2", "describe-regions"]).await {
            Ok(body) => {
                let regions = parse_regions(&body);
                if regions.is_empty() {
                    vec![FALLBACK_REGION.to_string()]
                } else {
                    regions
                }
            }
            Err(reason) => {
                warn!(%reason, "Failed to list regions");
                vec![FALLBACK_REGION.to_string()]
            }
        }
    }
}

/// Offline [`AccessChecker`] with a fixed answer set.
///
/// Used when permission checks are disabled and by tests.
#[derive(Debug, Clone)]
pub struct StaticAccess {
    identity: Option<CallerIdentity>,
    denied: Vec<String>,
    regions: Vec<String>,
}

impl StaticAccess {
    /// Allows everything for a placeholder identity.
    pub fn allow_all() -> Self {
        Self {
            identity: Some(CallerIdentity {
                account_id: "000000000000".into(),
                user_arn: "arn:aws:iam::000000000000:user/local".into(),
                user_id: "LOCAL".into(),
            }),
            denied: Vec::new(),
            regions: vec![FALLBACK_REGION.to_string()],
        }
    }

    /// No credentials at all.
    pub fn unauthenticated() -> Self {
        Self {
            identity: None,
            ..Self::allow_all()
        }
    }

    pub fn deny(mut self, action: impl Into<String>) -> Self {
        self.denied.push(action.into());
        self
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }
}

#[async_trait]
impl AccessChecker for StaticAccess {
    async fn identity(&self) -> Result<CallerIdentity, ToolError> {
        self.identity.clone().ok_or_else(|| ToolError::PermissionDenied {
            tool_name: "aws sts".into(),
            reason: NOT_AUTHENTICATED.into(),
        })
    }

    async fn check_permission(&self, action: &str) -> bool {
        self.identity.is_some() && !self.denied.iter().any(|d| d == action)
    }

    async fn allowed_regions(&self) -> Vec<String> {
        self.regions.clone()
    }
}

fn parse_caller_identity(body: &serde_json::Value) -> Option<CallerIdentity> {
    Some(CallerIdentity {
        account_id: body.get("Account")?.as_str()?.to_string(),
        user_arn: body.get("Arn")?.as_str()?.to_string(),
        user_id: body.get("UserId")?.as_str()?.to_string(),
    })
}

fn evaluation_allows(body: &serde_json::Value) -> bool {
    body["EvaluationResults"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .any(|r| r["EvalDecision"].as_str() == Some("allowed"))
        })
        .unwrap_or(false)
}

fn parse_regions(body: &serde_json::Value) -> Vec<String> {
    body["Regions"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r["RegionName"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sts_output() {
        let body = serde_json::json!({
            "UserId": "AIDAEXAMPLE",
            "Account": "123456789012",
            "Arn": "arn:aws:iam::123456789012:user/ops"
        });
        let identity = parse_caller_identity(&body).unwrap();
        assert_eq!(identity.account_id, "123456789012");
        assert_eq!(identity.user_arn, "arn:aws:iam::123456789012:user/ops");
        assert!(parse_caller_identity(&serde_json::json!({})).is_none());
    }

    #[test]
    fn simulation_decisions() {
        let allowed = serde_json::json!({"EvaluationResults": [{"EvalDecision": "allowed"}]});
        let denied = serde_json::json!({"EvaluationResults": [{"EvalDecision": "implicitDeny"}]});
        assert!(evaluation_allows(&allowed));
        assert!(!evaluation_allows(&denied));
        assert!(!evaluation_allows(&serde_json::json!({})));
    }

    #[test]
    fn parses_regions() {
        let body = serde_json::json!({"Regions": [{"RegionName": "us-east-1"}, {"RegionName": "eu-west-1"}]});
        assert_eq!(parse_regions(&body), vec!["us-east-1", "eu-west-1"]);
    }

    #[tokio::test]
    async fn static_access_denies_listed_actions() {
        let access = StaticAccess::allow_all().deny("s3:CreateBucket");
        assert!(!access.check_permission("s3:CreateBucket").await);
        assert!(access.check_permission("ec2:CreateVpc").await);
    }

    #[tokio::test]
    async fn unauthenticated_has_no_identity() {
        let access = StaticAccess::unauthenticated();
        let err = access.identity().await.unwrap_err();
        assert!(err.to_string().contains("AWS_PROFILE"));
        assert!(!access.check_permission("ec2:RunInstances").await);
    }

    #[tokio::test]
    async fn missing_cli_falls_back() {
        let access = AwsCliAccess::new("definitely-not-aws-cli-xyz");
        assert!(access.identity().await.is_err());
        assert_eq!(access.allowed_regions().await, vec![FALLBACK_REGION.to_string()]);
    }
}
