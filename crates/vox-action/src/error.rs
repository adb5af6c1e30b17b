//! Error types for action dispatch.

/// Errors from signal validation and capability execution.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("action execution failed: {0}")]
    ExecutionFailed(String),
    #[error("action already registered: {0}")]
    AlreadyRegistered(String),
}

impl ActionError {
    /// The bare cause, without the variant prefix, for in-band replies.
    pub fn cause(&self) -> &str {
        match self {
            ActionError::InvalidArguments(s) => s,
            ActionError::ExecutionFailed(s) => s,
            ActionError::AlreadyRegistered(s) => s,
        }
    }
}
