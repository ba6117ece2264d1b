//! Error types for unirepo_core.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using unirepo_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// A file or directory that was expected to exist is absent.
    ///
    /// Produced at the point of origin from `io::ErrorKind::NotFound`, so callers never
    /// inspect raw I/O error kinds to tell "absent" apart from real failures.
    #[error("Not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Repository root is invalid or not initialized.
    #[error("Invalid repository at {path}: {reason}")]
    InvalidRepository { path: PathBuf, reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// File name cannot be recorded in a dependency registry.
    #[error("Invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: String },

    /// A registry line is missing a field or carries an unparseable digest.
    #[error("Malformed entry in {path}: {line:?}")]
    MalformedEntry { path: PathBuf, line: String },

    /// A repair strategy could not run because its precondition does not hold.
    #[error("Repair unavailable for {path}: {reason}")]
    RepairUnavailable { path: PathBuf, reason: String },

    /// Compression of an exported object failed.
    #[error("Compression error: {reason}")]
    Compression { reason: String },

    /// The export watermark could not be parsed.
    #[error("Invalid watermark {value:?}: {reason}")]
    InvalidWatermark { value: String, reason: String },
}

impl Error {
    /// Convert an I/O error on `path`, mapping `NotFound` to [`Error::NotFound`].
    pub fn from_io(path: impl AsRef<Path>, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::not_found(path.as_ref())
        } else {
            Error::Io { source: err }
        }
    }

    /// Whether this error means "the thing is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an InvalidRepository error.
    pub fn invalid_repository(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidRepository {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create an InvalidFilename error.
    pub fn invalid_filename(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidFilename {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a MalformedEntry error.
    pub fn malformed_entry(path: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        Error::MalformedEntry {
            path: path.into(),
            line: line.into(),
        }
    }

    /// Create a RepairUnavailable error.
    pub fn repair_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::RepairUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Compression error.
    pub fn compression(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }

    /// Create an InvalidWatermark error.
    pub fn invalid_watermark(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidWatermark {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<tempfile::PathPersistError> for Error {
    fn from(err: tempfile::PathPersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: io::Error::other(err.to_string()),
            },
        }
    }
}
