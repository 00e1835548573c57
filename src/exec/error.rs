//! Error taxonomy for the exec bridge.

/// Error type for a single line of the event stream.
///
/// The bridge recovers from these locally by dropping the line; they are
/// only returned directly by [`parse_line`](crate::exec::parse_line).
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Failed to parse JSON: {reason}")]
    ParseError {
        /// The offending line.
        input: String,
        /// Parser diagnostic.
        reason: String,
    },
}

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Codex binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied executing {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A pipe that was configured as captured was missing after spawn.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    pub(crate) fn from_io(binary: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Failure surfaced to the consumer after all events have been yielded.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    /// The process ran and exited with a non-zero code.
    #[error("Codex exited with code {code}")]
    Exit { code: i32 },
    /// The process was killed by a signal nobody asked for.
    #[error("Codex terminated by signal {signal}")]
    Signal { signal: String },
    /// The process could not be started.
    #[error("Failed to spawn Codex process: {0}")]
    Spawn(#[from] SpawnError),
    /// The caller cancelled the run.
    #[error("Codex run cancelled")]
    Cancelled,
    /// Waiting on the process failed; its outcome is unknown.
    #[error("Failed to wait for Codex process: {0}")]
    Wait(std::io::Error),
}

impl ExecError {
    /// Returns true if the run ended because the caller cancelled it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the exit code for [`ExecError::Exit`].
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }
}
