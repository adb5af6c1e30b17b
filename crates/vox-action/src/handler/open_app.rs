//! Application launcher capability.
//!
//! Spawns a configured application detached, with output discarded.
//! Only names on the configured allowlist may be spawned.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use vox_core::types::ArgMap;

use crate::error::ActionError;
use crate::handler::CapabilityHandler;

/// Handler for `open_app {app: string}`.
pub struct OpenAppHandler {
    allowlist: Vec<String>,
}

impl OpenAppHandler {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self { allowlist }
    }

    fn is_allowed(&self, app: &str) -> bool {
        self.allowlist.iter().any(|a| a.eq_ignore_ascii_case(app))
    }
}

#[async_trait]
impl CapabilityHandler for OpenAppHandler {
    async fn execute(&self, args: &ArgMap) -> Result<String, ActionError> {
        let app = args
            .get("app")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidArguments("missing 'app'".to_string()))?;

        if !self.is_allowed(app) {
            return Err(ActionError::ExecutionFailed(format!(
                "application '{}' is not on the allowlist",
                app
            )));
        }

        Command::new(app)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ActionError::ExecutionFailed(format!("could not launch '{}': {}", app, e))
            })?;

        tracing::info!(app = %app, "Launched application");
        Ok(format!("Opened {}", app))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_core::types::ArgValue;

    fn args(app: &str) -> ArgMap {
        let mut map = ArgMap::new();
        map.insert("app".to_string(), ArgValue::Text(app.to_string()));
        map
    }

    #[tokio::test]
    async fn test_rejects_app_not_on_allowlist() {
        let handler = OpenAppHandler::new(vec!["cursor".to_string()]);
        let err = handler.execute(&args("rm")).await.unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(_)));
        assert!(err.to_string().contains("allowlist"));
    }

    #[tokio::test]
    async fn test_allowlist_is_case_insensitive() {
        let handler = OpenAppHandler::new(vec!["Cursor".to_string()]);
        assert!(handler.is_allowed("cursor"));
        assert!(handler.is_allowed("CURSOR"));
        assert!(!handler.is_allowed("vim"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_execution_failure() {
        // Allowed but almost certainly not installed under this name.
        let handler = OpenAppHandler::new(vec!["definitely-not-a-real-binary-xyz".to_string()]);
        let err = handler
            .execute(&args("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_app_argument() {
        let handler = OpenAppHandler::new(vec!["cursor".to_string()]);
        let err = handler.execute(&ArgMap::new()).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }
}
