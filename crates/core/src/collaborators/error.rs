//! Error types for external collaborators.

use thiserror::Error;

/// Errors raised while talking to an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The configured program does not exist.
    #[error("Program not found: {program}")]
    ProgramNotFound { program: String },

    /// The program ran but exited unsuccessfully.
    #[error("{program} exited with {code:?}: {stderr}")]
    ExitFailure {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The program did not answer in time.
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// The program answered with something that is not the expected JSON.
    #[error("Invalid response from {program}: {reason}")]
    InvalidResponse { program: String, reason: String },

    /// The collaborator reported a failure of its own.
    #[error("{0}")]
    Failed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub(crate) fn spawn(program: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::ProgramNotFound {
                program: program.to_string(),
            }
        } else {
            Self::Io(e)
        }
    }
}
