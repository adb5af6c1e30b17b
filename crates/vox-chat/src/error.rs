//! Error types for the conversational engine.

use vox_core::error::VoxError;

/// Errors from the turn loop.
///
/// Only caller mistakes and teardown failures surface as errors; every
/// runtime failure inside a turn degrades to some spoken response instead.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transcript cannot be empty")]
    EmptyTranscript,
    #[error("transcript exceeds maximum length of {0} characters")]
    TranscriptTooLong(usize),
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<VoxError> for ChatError {
    fn from(err: VoxError) -> Self {
        ChatError::StorageError(err.to_string())
    }
}
