//! Unified error type for dropconvert.
//!
//! Control-plane failures (bad paths, invalid transitions, unknown ids) are
//! returned synchronously. Worker-side failures are folded into a
//! [`FailureReason`](crate::job::FailureReason) via [`Error::failure_kind`]
//! and recorded on the job instead of being propagated.

use std::fmt;
use std::path::PathBuf;

use crate::ids::JobId;
use crate::job::{FailureKind, JobState};

/// Unified error type covering all failure modes in dropconvert.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A submitted path is not an existing, readable, non-empty file.
    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath {
        /// The rejected path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested operation is not allowed in the job's current state.
    #[error("Cannot {action} job {job_id} in state {from}")]
    InvalidTransition {
        /// Job the operation targeted.
        job_id: JobId,
        /// State the job was in.
        from: JobState,
        /// The attempted operation.
        action: &'static str,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The path already has a queued or running job.
    #[error("Already queued: {}", .0.display())]
    AlreadyQueued(PathBuf),

    /// The conversion capability rejected this particular file.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The operation observed its cancellation token.
    #[error("Cancelled")]
    Cancelled,

    /// An external tool (ffmpeg, magick) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Configuration or request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors (worker crash, closed channel).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a worker-side error for recording on a failed job.
    ///
    /// Anything the file itself can cause is a conversion failure; the rest
    /// points at the engine and is reported as internal.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Conversion(_)
            | Error::Tool { .. }
            | Error::InvalidPath { .. }
            | Error::Io { .. } => FailureKind::Conversion,
            Error::InvalidTransition { .. }
            | Error::NotFound { .. }
            | Error::AlreadyQueued(_)
            | Error::Cancelled
            | Error::Validation(_)
            | Error::Internal(_) => FailureKind::Internal,
        }
    }

    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convenience constructor for [`Error::InvalidPath`].
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
