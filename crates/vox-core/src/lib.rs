//! Shared contracts for the Vox conversation core.
//!
//! Defines the turn/action data model, the error taxonomy, and the
//! TOML configuration shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::VoxConfig;
pub use error::{Result, VoxError};
