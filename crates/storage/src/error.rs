//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl ErrorKind {
    /// Map an I/O error onto the categories callers branch on, attributing
    /// it to `path`.
    pub fn from_io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            IoErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            IoErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendError(_))
    }

    /// Returns `true` if the error only says the file was not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_kinds() {
        let path = Path::new("camscanner/1.jpg");
        let kind = ErrorKind::from_io(IoError::from(IoErrorKind::NotFound), path);
        assert!(kind.is_not_found());
        assert!(!kind.is_retryable());
        let kind = ErrorKind::from_io(IoError::from(IoErrorKind::PermissionDenied), path);
        assert!(matches!(kind, ErrorKind::PermissionDenied(p) if p == path));
        let kind = ErrorKind::from_io(IoError::from(IoErrorKind::Interrupted), path);
        assert!(kind.is_retryable());
    }
}
