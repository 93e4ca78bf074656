//! Durable log writer
//!
//! The writer is the single appender of the log file. It is owned by the
//! merger for the lifetime of the broker; nothing else opens the log for
//! writing.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{LogError, LogResult};
use super::frame;

/// Name of the log file inside the data directory
pub const LOG_FILE_NAME: &str = "log_000";

/// When appended records are pushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Leave flushing to the operating system
    #[default]
    Os,
    /// `fdatasync` after every append
    Fsync,
}

/// Appends framed records to the log file.
pub struct LogWriter {
    log_path: PathBuf,
    file: File,
    sync_mode: SyncMode,
    /// Current file length; also the offset of the next record
    len: u64,
    records_appended: u64,
}

impl LogWriter {
    /// Opens or creates `<data_dir>/log_000` for append.
    pub fn open(data_dir: &Path, sync_mode: SyncMode) -> LogResult<Self> {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir).map_err(|e| {
                LogError::append_failed(
                    format!("Failed to create data directory: {}", data_dir.display()),
                    e,
                )
            })?;
        }

        let log_path = data_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                LogError::append_failed(format!("Failed to open log file: {}", log_path.display()), e)
            })?;

        let len = file
            .metadata()
            .map_err(|e| LogError::append_failed("Failed to read log metadata", e))?
            .len();

        Ok(Self {
            log_path,
            file,
            sync_mode,
            len,
            records_appended: 0,
        })
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Returns the current length of the log in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the log holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of records appended through this writer.
    pub fn records_appended(&self) -> u64 {
        self.records_appended
    }

    /// Encodes `payload` and appends it as one record.
    ///
    /// Returns the byte offset at which the record starts. If the write
    /// fails part-way the file is cut back to its previous length so the
    /// next record never follows a torn frame. If that cut fails too the
    /// error is fatal.
    pub fn append(&mut self, payload: &[u8]) -> LogResult<u64> {
        let offset = self.len;
        let record = frame::encode(payload);

        if let Err(e) = self.file.write_all(&record) {
            let rollback = self.file.set_len(offset);
            return Err(failed_append(offset, e, rollback));
        }

        if self.sync_mode == SyncMode::Fsync {
            self.file.sync_data().map_err(|e| {
                LogError::fsync_failed(format!("fsync failed after append at offset {}", offset), e)
            })?;
        }

        self.len += record.len() as u64;
        self.records_appended += 1;
        Ok(offset)
    }

}

/// Error for a write that failed at `offset`, given the outcome of cutting
/// the file back to `offset`.
fn failed_append(offset: u64, write_error: io::Error, rollback: io::Result<()>) -> LogError {
    match rollback {
        Ok(()) => LogError::append_failed(
            format!("Failed to append record at offset {}", offset),
            write_error,
        ),
        Err(e) => LogError::rollback_failed(
            format!("Failed to truncate log back to offset {}", offset),
            &write_error,
            e,
        ),
    }
}
