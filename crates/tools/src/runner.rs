//! Terraform command runner.
//!
//! Every generated project lives in its own directory under the workspace.
//! Commands inherit the process environment (AWS_PROFILE and friends) and
//! are killed when their timeout elapses.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use infrapilot_config::TerraformConfig;
use infrapilot_core::error::ToolError;
use infrapilot_core::tool::ToolResult;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Saved plan file written by `terraform plan -out=tfplan`.
pub const PLAN_FILE: &str = "tfplan";

/// Captured result of one finished command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandOutcome {
    /// Map the outcome onto a tool result, naming `action` in the failure text.
    pub fn into_tool_result(self, action: &str) -> ToolResult {
        let payload = serde_json::json!({
            "stdout": self.stdout,
            "stderr": self.stderr,
            "returncode": self.returncode,
        });
        if self.success {
            ToolResult::ok(payload)
        } else {
            ToolResult::failure_with(
                format!("terraform {action} failed with exit code {}", self.returncode),
                payload,
            )
        }
    }
}

/// Runs the terraform binary inside project directories.
#[derive(Debug, Clone)]
pub struct TerraformRunner {
    binary: String,
    workspace_dir: PathBuf,
    command_timeout: Duration,
    show_timeout: Duration,
}

impl TerraformRunner {
    pub fn new(binary: impl Into<String>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workspace_dir: workspace_dir.into(),
            command_timeout: Duration::from_secs(1800),
            show_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &TerraformConfig) -> Self {
        Self::new(&config.binary, &config.workspace_dir)
            .with_timeouts(
                Duration::from_secs(config.command_timeout_secs),
                Duration::from_secs(config.show_timeout_secs),
            )
    }

    pub fn with_timeouts(mut self, command: Duration, show: Duration) -> Self {
        self.command_timeout = command;
        self.show_timeout = show;
        self
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Directory of `project`, rejecting names that would escape the workspace.
    pub fn project_dir(&self, project: &str) -> Result<PathBuf, ToolError> {
        validate_project_name(project)?;
        Ok(self.workspace_dir.join(project))
    }

    /// Directory of an already generated project.
    pub async fn existing_project(&self, project: &str) -> Result<PathBuf, ToolError> {
        let dir = self.project_dir(project)?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(ToolError::InvalidArguments(format!(
                "Project '{project}' not found in the Terraform workspace"
            )));
        }
        Ok(dir)
    }

    /// Create the project directory and write `main.tf` into it.
    pub async fn write_project(&self, project: &str, main_tf: &str) -> Result<PathBuf, ToolError> {
        let dir = self.project_dir(project)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_failure(project, e))?;
        tokio::fs::write(dir.join("main.tf"), main_tf)
            .await
            .map_err(|e| io_failure(project, e))?;
        info!(project, dir = %dir.display(), "Wrote Terraform project");
        Ok(dir)
    }

    /// Write an extra file next to `main.tf`.
    pub async fn write_file(&self, project: &str, name: &str, contents: &[u8]) -> Result<(), ToolError> {
        let dir = self.project_dir(project)?;
        tokio::fs::write(dir.join(name), contents)
            .await
            .map_err(|e| io_failure(project, e))
    }

    pub async fn has_saved_plan(&self, project: &str) -> bool {
        match self.project_dir(project) {
            Ok(dir) => tokio::fs::try_exists(dir.join(PLAN_FILE)).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn init(&self, project: &str) -> Result<CommandOutcome, ToolError> {
        let dir = self.project_dir(project)?;
        self.run(&["init", "-input=false"], &dir, self.command_timeout).await
    }

    pub async fn plan(&self, project: &str) -> Result<CommandOutcome, ToolError> {
        let dir = self.existing_project(project).await?;
        let out = format!("-out={PLAN_FILE}");
        self.run(&["plan", &out, "-input=false"], &dir, self.command_timeout).await
    }

    /// Apply the saved plan when one exists, otherwise apply with `-auto-approve`.
    pub async fn apply(&self, project: &str, use_saved_plan: bool) -> Result<CommandOutcome, ToolError> {
        let dir = self.existing_project(project).await?;
        let args: &[&str] = if use_saved_plan {
            &["apply", "-input=false", PLAN_FILE]
        } else {
            &["apply", "-auto-approve", "-input=false"]
        };
        self.run(args, &dir, self.command_timeout).await
    }

    pub async fn destroy(&self, project: &str, auto_approve: bool) -> Result<CommandOutcome, ToolError> {
        let dir = self.existing_project(project).await?;
        let args: &[&str] = if auto_approve {
            &["destroy", "-auto-approve", "-input=false"]
        } else {
            &["destroy", "-input=false"]
        };
        self.run(args, &dir, self.command_timeout).await
    }

    /// `terraform show -json`, which reports the current state.
    pub async fn show(&self, project: &str) -> Result<CommandOutcome, ToolError> {
        let dir = self.existing_project(project).await?;
        self.run(&["show", "-json"], &dir, self.show_timeout).await
    }

    async fn run(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<CommandOutcome, ToolError> {
        let action = format!("terraform {}", args.first().copied().unwrap_or_default());
        debug!(command = %self.binary, ?args, cwd = %cwd.display(), "Running Terraform");

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(cwd)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: action.clone(),
                reason: format!("failed to start {}: {e}", self.binary),
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                tool_name: action.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(%action, timeout_secs = timeout.as_secs(), "Terraform command timed out");
                return Err(ToolError::Timeout {
                    tool_name: action,
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let returncode = output.status.code().unwrap_or(-1);
        let outcome = CommandOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode,
        };

        if outcome.success {
            info!(%action, "Terraform command succeeded");
        } else {
            warn!(%action, returncode, stderr = %outcome.stderr.trim(), "Terraform command failed");
        }
        Ok(outcome)
    }
}

/// Project names become directory names: one path component, nothing hidden.
pub fn validate_project_name(project: &str) -> Result<(), ToolError> {
    let bad = project.is_empty()
        || project.starts_with('.')
        || project.contains(['/', '\\'])
        || project.contains("..")
        || project.chars().any(char::is_control);
    if bad {
        return Err(ToolError::InvalidArguments(format!(
            "Invalid project name '{project}'"
        )));
    }
    Ok(())
}

fn io_failure(project: &str, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: format!("project {project}"),
        reason: e.to_string(),
    }
}
