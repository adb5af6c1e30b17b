//! Allowlisted shell command capability.
//!
//! Runs a command line whose first word is on a fixed allowlist, under a
//! hard timeout. Non-zero exit is a fault carrying stderr; the command is
//! never retried here.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use vox_core::types::ArgMap;

use crate::error::ActionError;
use crate::handler::CapabilityHandler;

/// Handler for `run_command {command: string}`.
pub struct RunCommandHandler {
    allowlist: Vec<String>,
    timeout: Duration,
}

impl RunCommandHandler {
    pub fn new(allowlist: Vec<String>, timeout: Duration) -> Self {
        Self { allowlist, timeout }
    }
}

#[async_trait]
impl CapabilityHandler for RunCommandHandler {
    async fn execute(&self, args: &ArgMap) -> Result<String, ActionError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidArguments("missing 'command'".to_string()))?;

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ActionError::InvalidArguments(
                "command must not be empty".to_string(),
            ));
        };

        if !self.allowlist.iter().any(|c| c == program) {
            return Err(ActionError::ExecutionFailed(format!(
                "command '{}' is not allowed",
                program
            )));
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(parts).output(),
        )
        .await
        .map_err(|_| {
            ActionError::ExecutionFailed(format!(
                "command timed out after {} seconds",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| ActionError::ExecutionFailed(format!("could not run '{}': {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionError::ExecutionFailed(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(command = %program, "Command executed");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            Ok("Command completed".to_string())
        } else {
            Ok(stdout.to_string())
        }
    }
}
