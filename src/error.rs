//! Storage error types shared by the blob and queue emulators.

use http::StatusCode;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Azure Storage error codes surfaced by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // General errors
    InternalError,
    InvalidInput,
    InvalidResourceName,
    OutOfRangeInput,
    ResourceNotFound,
    ServerBusy,

    // Blob-specific errors
    BlobNotFound,
    ContainerAlreadyExists,
    ContainerNotFound,
    CopyAcrossAccountsNotSupported,
    InvalidSourceBlobUrl,

    // Queue-specific errors
    MessageNotFound,
    QueueAlreadyExists,
    QueueNotFound,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidResourceName => "InvalidResourceName",
            ErrorCode::OutOfRangeInput => "OutOfRangeInput",
            ErrorCode::ResourceNotFound => "ResourceNotFound",
            ErrorCode::ServerBusy => "ServerBusy",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::ContainerAlreadyExists => "ContainerAlreadyExists",
            ErrorCode::ContainerNotFound => "ContainerNotFound",
            ErrorCode::CopyAcrossAccountsNotSupported => "CopyAcrossAccountsNotSupported",
            ErrorCode::InvalidSourceBlobUrl => "InvalidSourceBlobUrl",
            ErrorCode::MessageNotFound => "MessageNotFound",
            ErrorCode::QueueAlreadyExists => "QueueAlreadyExists",
            ErrorCode::QueueNotFound => "QueueNotFound",
        }
    }

    /// Returns the HTTP status code the real service would answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ErrorCode::InvalidInput
            | ErrorCode::InvalidResourceName
            | ErrorCode::OutOfRangeInput
            | ErrorCode::InvalidSourceBlobUrl => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            ErrorCode::CopyAcrossAccountsNotSupported => StatusCode::FORBIDDEN,

            // 404 Not Found
            ErrorCode::BlobNotFound
            | ErrorCode::ContainerNotFound
            | ErrorCode::MessageNotFound
            | ErrorCode::QueueNotFound
            | ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            ErrorCode::ContainerAlreadyExists | ErrorCode::QueueAlreadyExists => {
                StatusCode::CONFLICT
            }

            // 500 Internal Server Error
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,

            // 503 Service Unavailable
            ErrorCode::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ContainerAlreadyExists => "The specified container already exists.",
            ErrorCode::ContainerNotFound => "The specified container does not exist.",
            ErrorCode::CopyAcrossAccountsNotSupported => {
                "The copy source must belong to the same storage account."
            }
            ErrorCode::InvalidResourceName => {
                "The specified resource name contains invalid characters."
            }
            ErrorCode::InvalidSourceBlobUrl => "The source URL for the copy operation is invalid.",
            ErrorCode::MessageNotFound => "The specified message does not exist.",
            ErrorCode::QueueAlreadyExists => "The specified queue already exists.",
            ErrorCode::QueueNotFound => "The specified queue does not exist.",
            ErrorCode::ResourceNotFound => "The specified resource does not exist.",
            ErrorCode::ServerBusy => {
                "The server is currently unable to receive requests. Please retry your request."
            }
            ErrorCode::InternalError => {
                "The server encountered an internal error. Please retry the request."
            }
            _ => "An error occurred while processing the request.",
        }
    }
}

/// Storage error with code and message.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    /// Filesystem path the failure relates to, when there is one.
    pub path: Option<PathBuf>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            path: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    /// Attaches the path the failure relates to.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Exclusive access to `path` could not be obtained within the retry budget.
    pub fn busy(path: &Path, attempts: u32) -> Self {
        Self::with_message(
            ErrorCode::ServerBusy,
            format!(
                "{} is held by another process (gave up after {} attempts)",
                path.display(),
                attempts
            ),
        )
        .with_path(path)
    }

    /// Wraps an unexpected I/O failure, keeping the OS message.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::ResourceNotFound,
            io::ErrorKind::InvalidInput => ErrorCode::InvalidInput,
            _ => ErrorCode::InternalError,
        };
        Self::with_message(code, format!("{}: {}", path.display(), err)).with_path(path)
    }

    /// True for every "target absent" code.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::BlobNotFound
                | ErrorCode::ContainerNotFound
                | ErrorCode::MessageNotFound
                | ErrorCode::QueueNotFound
                | ErrorCode::ResourceNotFound
        )
    }

    /// True when the failure was lock contention that outlasted the retries.
    pub fn is_busy(&self) -> bool {
        self.code == ErrorCode::ServerBusy
    }

    /// HTTP status a service shim should answer with.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            Path::new("/tmp/x"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.path.as_deref(), Some(Path::new("/tmp/x")));
    }

    #[test]
    fn test_busy_is_service_unavailable() {
        let err = StorageError::busy(Path::new("/tmp/locked"), 3);
        assert!(err.is_busy());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message.contains("/tmp/locked"));
    }
}
