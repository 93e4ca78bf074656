//! Errors reported by the `blobcast` binary
//!
//! Every command either succeeds or fails with one `CliError`, which
//! `main` prints as `<code>: <message>` before exiting with status 1.
//! Codes separate the operator's side (config, init state, stdin) from
//! the broker's side (startup, serving, an unreadable log) and from a
//! broker that could not be reached.

use std::fmt;
use std::io;
use std::path::Path;

use crate::broker::BrokerError;
use crate::log::LOG_FILE_NAME;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Config file missing, malformed or rejected by validation
    ConfigError,
    /// Reading stdin or writing stdout failed
    IoError,
    /// `init` found an existing log
    AlreadyInitialized,
    /// `start` or `dump` found no log
    NotInitialized,
    /// Recovery, log open or bind failed
    BootFailed,
    /// The broker stopped with an error, usually a halted merger
    ServeFailed,
    /// `publish` or `tail` could not talk to the broker
    ClientFailed,
    /// `dump` hit a log it cannot decode
    LogUnreadable,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "BLOBCAST_CLI_CONFIG_ERROR",
            Self::IoError => "BLOBCAST_CLI_IO_ERROR",
            Self::AlreadyInitialized => "BLOBCAST_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "BLOBCAST_CLI_NOT_INITIALIZED",
            Self::BootFailed => "BLOBCAST_CLI_BOOT_FAILED",
            Self::ServeFailed => "BLOBCAST_CLI_SERVE_FAILED",
            Self::ClientFailed => "BLOBCAST_CLI_CLIENT_FAILED",
            Self::LogUnreadable => "BLOBCAST_CLI_LOG_UNREADABLE",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// `data_dir` already holds a log; `init` never touches an existing one
    pub fn already_initialized(data_dir: &Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!(
                "{} already exists; refusing to reinitialize",
                data_dir.join(LOG_FILE_NAME).display()
            ),
        )
    }

    /// `data_dir` has no log yet
    pub fn not_initialized(data_dir: &Path) -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            format!(
                "No {} in {}. Run 'blobcast init' first.",
                LOG_FILE_NAME,
                data_dir.display()
            ),
        )
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    /// The broker was serving and stopped on an error
    pub fn serve_failed(e: BrokerError) -> Self {
        let msg = match e {
            BrokerError::MergerHalted => {
                "Merger halted; pending records were left on disk for the next start".to_string()
            }
            other => other.to_string(),
        };
        Self::new(CliErrorCode::ServeFailed, msg)
    }

    /// `publish` or `tail` failed against the broker at `addr`
    pub fn client_failed(addr: &str, e: BrokerError) -> Self {
        Self::new(CliErrorCode::ClientFailed, format!("broker at {}: {}", addr, e))
    }

    pub fn log_unreadable(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::LogUnreadable, msg)
    }

    /// Map a broker startup error, keeping config problems distinct
    pub fn from_boot(e: BrokerError) -> Self {
        match e {
            BrokerError::Config(msg) => Self::config_error(msg),
            other => Self::boot_failed(other.to_string()),
        }
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
