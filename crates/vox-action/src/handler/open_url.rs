//! URL open capability.
//!
//! Opens URLs with the platform opener. Only `http://` and `https://`
//! schemes are accepted; `javascript:`, `file://`, `data:`, and all other
//! schemes are rejected before anything is spawned.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use vox_core::types::ArgMap;

use crate::error::ActionError;
use crate::handler::CapabilityHandler;

/// Handler for `open_url {url: string}`.
pub struct OpenUrlHandler;

impl OpenUrlHandler {
    fn opener(url: &str) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

#[async_trait]
impl CapabilityHandler for OpenUrlHandler {
    async fn execute(&self, args: &ArgMap) -> Result<String, ActionError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidArguments("missing 'url'".to_string()))?;

        if url.is_empty() {
            return Err(ActionError::InvalidArguments(
                "URL must not be empty".to_string(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ActionError::InvalidArguments(format!(
                "unsupported URL scheme, only http:// and https:// are allowed: {}",
                url
            )));
        }

        Self::opener(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ActionError::ExecutionFailed(format!("could not open URL: {}", e)))?;

        tracing::info!(url = %url, "Opened URL");
        Ok(format!("Opened {}", url))
    }
}
