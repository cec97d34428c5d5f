//! Compression Error Types
//!
//! Errors returned when *opening* a stream use `exn` for automatic location
//! tracking and error tree construction. Errors that happen *while reading*
//! a stream have to travel through [`std::io::Read`], so an external decoder
//! that fails mid-stream is reported as an [`std::io::Error`] wrapping a
//! [`ProcessError`].

use derive_more::{Display, Error};

/// A compression error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for compression operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to initialize a built-in encoder/decoder for the requested format.
    Encoder,
    /// Data is corrupt or malformed. Don't retry with the same input. Used for reading/decoding.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// The requested or detected format has no encode/decode path. Carries
    /// the format's file extension, which may be empty.
    #[display("unsupported compression format: {_0:?}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// A required external tool is not installed (or not on `PATH`).
    #[display("external tool not found: {_0}")]
    ToolNotFound(#[error(not(source))] String),
    /// An external process could not be started.
    #[display("failed to spawn external process: {_0}")]
    Spawn(#[error(not(source))] String),
    /// An I/O operation on the underlying stream failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

/// An external decoder process that did not finish cleanly.
///
/// Delivered to the reader of a [`ProcessReader`](crate::process::ProcessReader)
/// as the payload of an [`std::io::Error`] once the process output is
/// exhausted. Every read after that returns the same error again.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("{program}: {reason}: {}", stderr.trim())]
pub struct ProcessError {
    /// Program that was run.
    pub program: String,
    /// Exit status, or whatever else went wrong.
    pub reason: String,
    /// Everything the process wrote to standard error.
    pub stderr: String,
}

impl ProcessError {
    pub(crate) fn new(program: impl Into<String>, reason: impl ToString, stderr: impl Into<String>) -> Self {
        Self { program: program.into(), reason: reason.to_string(), stderr: stderr.into() }
    }
}

impl From<ProcessError> for std::io::Error {
    fn from(err: ProcessError) -> Self {
        std::io::Error::other(err)
    }
}
