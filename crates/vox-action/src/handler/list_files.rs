//! Directory listing capability.

use async_trait::async_trait;

use vox_core::types::ArgMap;

use crate::error::ActionError;
use crate::handler::CapabilityHandler;

/// How many entries are spoken at most; the count always covers them all.
const MAX_NAMED_ENTRIES: usize = 10;

/// Handler for `list_files {directory?: string}`.
///
/// Defaults to the current working directory. Entry names are sorted so
/// the spoken result is stable.
pub struct ListFilesHandler;

#[async_trait]
impl CapabilityHandler for ListFilesHandler {
    async fn execute(&self, args: &ArgMap) -> Result<String, ActionError> {
        let directory = match args.get("directory").and_then(|v| v.as_str()) {
            Some(dir) => dir.to_string(),
            None => std::env::current_dir()
                .map_err(|e| ActionError::ExecutionFailed(format!("no working directory: {}", e)))?
                .to_string_lossy()
                .to_string(),
        };

        let mut entries = tokio::fs::read_dir(&directory).await.map_err(|e| {
            ActionError::ExecutionFailed(format!("could not read '{}': {}", directory, e))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ActionError::ExecutionFailed(format!("could not read '{}': {}", directory, e))
        })? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();

        let count = names.len();
        if count == 0 {
            return Ok(format!("Found 0 items in {}", directory));
        }

        names.truncate(MAX_NAMED_ENTRIES);
        Ok(format!(
            "Found {} items in {}: {}",
            count,
            directory,
            names.join(", ")
        ))
    }
}
