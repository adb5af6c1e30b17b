//! Capability handler trait and built-in handler implementations.
//!
//! A handler is the single side-effecting edge of the dispatcher: it
//! receives validated arguments and returns the text to merge back into
//! the spoken reply, or a fault.

use async_trait::async_trait;

use vox_core::types::ArgMap;

use crate::error::ActionError;

pub mod clock;
pub mod list_files;
pub mod open_app;
pub mod open_url;
pub mod run_command;

/// Executable capability behind a registry entry.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Execute with schema-validated arguments.
    ///
    /// Returns the result text to speak, or a fault carrying the
    /// underlying cause.
    async fn execute(&self, args: &ArgMap) -> Result<String, ActionError>;
}
