//! Common error types for sluice.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::outcome::Outcome;

/// Result type alias using [`SluiceError`].
pub type SluiceResult<T> = Result<T, SluiceError>;

/// Errors raised while setting up, running or reporting on a child process.
#[derive(Error, Diagnostic, Debug)]
pub enum SluiceError {
    /// Generic configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(sluice::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// A timeout policy with only one field, or a negative field.
    #[error("Invalid timeout for {command:?}: {message}")]
    #[diagnostic(
        code(sluice::config::timeout),
        help(
            "Both the grace period and the force delay are needed. With grace=1000ms and \
             force=500ms the child is force killed 1.5s after it started. Use an infinite \
             force delay to never use force."
        )
    )]
    InvalidTimeout {
        /// The command being configured.
        command: Vec<String>,
        /// What was wrong with the policy.
        message: String,
    },

    /// The working directory does not exist or is not a directory.
    #[error("Working directory {} for {command:?} is not a directory", .path.display())]
    #[diagnostic(code(sluice::config::cwd))]
    InvalidCwd {
        /// The command being configured.
        command: Vec<String>,
        /// The offending path.
        path: PathBuf,
    },

    /// An input source could not be used.
    #[error("Invalid stdin source: {message}")]
    #[diagnostic(code(sluice::source))]
    Source {
        /// The error message.
        message: String,
    },

    /// Every stdin source was a null marker (or none were given).
    #[error("Stdin configuration supplied no usable arguments.")]
    #[diagnostic(
        code(sluice::source::empty),
        help("To give the child no input at all, configure a single null source instead")
    )]
    NoUsableInput,

    /// A file source could not be opened.
    #[error("Failed to open stdin source {}: {source}", .path.display())]
    #[diagnostic(code(sluice::source::open))]
    SourceOpen {
        /// The file that failed to open.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// An output destination was given as a bare path.
    #[error("Output destination {path:?} is a bare path")]
    #[diagnostic(
        code(sluice::sink::bare_path),
        help("Say how the file should be written: overwrite:<path> or append:<path>")
    )]
    BarePathSink {
        /// The bare path.
        path: String,
    },

    /// An output destination could not be understood.
    #[error("Invalid output destination: {message}")]
    #[diagnostic(code(sluice::sink))]
    Sink {
        /// The error message.
        message: String,
    },

    /// A file sink could not be opened.
    #[error("Failed to open output file {}: {source}", .path.display())]
    #[diagnostic(code(sluice::sink::open))]
    SinkOpen {
        /// The file that failed to open.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The child process could not be spawned.
    #[error("Failed to spawn {command:?}: {source}")]
    #[diagnostic(
        code(sluice::process::spawn),
        help("Check that the program exists and is executable")
    )]
    Spawn {
        /// The command that failed to spawn.
        command: Vec<String>,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A process operation failed after spawn.
    #[error("Process error: {message}")]
    #[diagnostic(code(sluice::process))]
    Process {
        /// The error message.
        message: String,
    },

    /// The child exited unsuccessfully and the run was asked to fail loudly.
    #[error("Command {:?} exited with code {}", .outcome.command, .outcome.exit.code)]
    #[diagnostic(
        code(sluice::outcome::non_zero),
        help("The outcome, including any captured output, is attached to this error")
    )]
    NonZeroExit {
        /// Everything the run produced.
        outcome: Box<Outcome>,
    },

    /// The child's stdin is closed or was never piped.
    #[error("Stdin of process {pid} is closed")]
    #[diagnostic(
        code(sluice::stdin::closed),
        help("Configure stdin as open (or feed it sources) to write to it after spawn")
    )]
    StdinClosed {
        /// The child process ID.
        pid: u32,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(sluice::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(sluice::serialization))]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(sluice::internal),
        help("This is a bug in sluice")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl SluiceError {
    /// The outcome attached to a [`SluiceError::NonZeroExit`].
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::NonZeroExit { outcome } => Some(&**outcome),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
