use thiserror::Error;

/// Top-level error type for the Vox system.
///
/// Each variant wraps a subsystem-specific failure. Subsystem crates define
/// their own error types and implement `From<SubsystemError> for VoxError`
/// so that the `?` operator works seamlessly across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VoxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for VoxError {
    fn from(err: toml::de::Error) -> Self {
        VoxError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VoxError {
    fn from(err: toml::ser::Error) -> Self {
        VoxError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VoxError {
    fn from(err: serde_json::Error) -> Self {
        VoxError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Vox operations.
pub type Result<T> = std::result::Result<T, VoxError>;
