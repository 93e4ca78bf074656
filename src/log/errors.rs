//! Durable log error types
//!
//! Error codes:
//! - BLOBCAST_LOG_APPEND_FAILED (ERROR severity)
//! - BLOBCAST_LOG_FSYNC_FAILED (FATAL severity)
//! - BLOBCAST_LOG_ROLLBACK_FAILED (FATAL severity)
//! - BLOBCAST_LOG_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

/// Severity levels for log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The merge fails, the broker continues
    Error,
    /// The broker must not continue with this log
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Durable log error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Open or write failed, file length unchanged
    AppendFailed,
    /// Flush to stable storage failed
    FsyncFailed,
    /// A failed append could not be cut back; the tail may hold a torn frame
    RollbackFailed,
    /// Log bytes do not decode as frames
    Corruption,
}

impl LogErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::AppendFailed => "BLOBCAST_LOG_APPEND_FAILED",
            LogErrorCode::FsyncFailed => "BLOBCAST_LOG_FSYNC_FAILED",
            LogErrorCode::RollbackFailed => "BLOBCAST_LOG_ROLLBACK_FAILED",
            LogErrorCode::Corruption => "BLOBCAST_LOG_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::AppendFailed => Severity::Error,
            LogErrorCode::FsyncFailed => Severity::Fatal,
            LogErrorCode::RollbackFailed => Severity::Fatal,
            LogErrorCode::Corruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Durable log error with context
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    /// Create a new append failed error
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::AppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new fsync failed error
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::FsyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a rollback failed error. `source` is the truncate error and
    /// `details` carries the write error that triggered the rollback.
    pub fn rollback_failed(
        message: impl Into<String>,
        write_error: &io::Error,
        source: io::Error,
    ) -> Self {
        Self {
            code: LogErrorCode::RollbackFailed,
            message: message.into(),
            details: Some(format!("write error: {}", write_error)),
            source: Some(source),
        }
    }

    /// Create a new corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a corruption error with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for durable log operations
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LogErrorCode::AppendFailed.code(), "BLOBCAST_LOG_APPEND_FAILED");
        assert_eq!(LogErrorCode::FsyncFailed.code(), "BLOBCAST_LOG_FSYNC_FAILED");
        assert_eq!(LogErrorCode::RollbackFailed.code(), "BLOBCAST_LOG_ROLLBACK_FAILED");
        assert_eq!(LogErrorCode::Corruption.code(), "BLOBCAST_LOG_CORRUPTION");
    }

    #[test]
    fn test_append_failed_is_not_fatal() {
        let err = LogError::append_failed(
            "write failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fsync_and_corruption_are_fatal() {
        let err = LogError::fsync_failed(
            "fsync failed",
            io::Error::new(io::ErrorKind::Other, "disk error"),
        );
        assert!(err.is_fatal());
        assert!(LogError::corruption("bad frame").is_fatal());
    }

    #[test]
    fn test_rollback_failed_is_fatal() {
        let write_error = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = LogError::rollback_failed(
            "truncate failed",
            &write_error,
            io::Error::new(io::ErrorKind::Other, "read-only file system"),
        );
        assert!(err.is_fatal());
        assert_eq!(err.code(), LogErrorCode::RollbackFailed);
        assert!(err.to_string().contains("write error: disk full"));
    }

    #[test]
    fn test_display_contains_offset() {
        let err = LogError::corruption_at_offset(17, "stray delimiter");
        let display = err.to_string();
        assert!(display.contains("BLOBCAST_LOG_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("stray delimiter"));
        assert!(display.contains("byte_offset: 17"));
    }
}
