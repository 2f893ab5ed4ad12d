//! Pipeline error types

use std::io;

use crate::process::ProcessRole;

/// Session-level relay failure
///
/// Any of these aborts the rest of the queue and ends the run in `Error`;
/// the message becomes the session's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Every queued URL failed to resolve
    #[error("no valid media: none of the queued videos could be resolved")]
    NoValidMedia,

    /// The publish process exited or stopped accepting input
    #[error("publish process died: {0}")]
    PublishProcessDied(String),

    /// A decode process could not be started or its output failed
    #[error("decode process failed: {0}")]
    DecodeProcessFailed(String),

    /// A tool executable does not exist
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Unexpected I/O while wiring processes together
    #[error("relay I/O error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Classify a failed spawn of `program` in `role`
    pub fn spawn_failed(role: ProcessRole, program: &str, error: &io::Error) -> Self {
        match (error.kind(), role) {
            (io::ErrorKind::NotFound, _) => PipelineError::ToolNotFound(program.to_string()),
            (_, ProcessRole::Decode) => {
                PipelineError::DecodeProcessFailed(format!("failed to start {}: {}", program, error))
            }
            (_, ProcessRole::Publish) => {
                PipelineError::Io(format!("failed to start {}: {}", program, error))
            }
        }
    }
}
