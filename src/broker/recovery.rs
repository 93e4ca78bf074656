//! Startup recovery
//!
//! Runs before the listener is bound:
//!
//! 1. Remove leftover `.`-prefixed temp files. They were never acknowledged.
//! 2. Scan the log and truncate a torn final record. Any other malformed
//!    bytes are corruption and abort startup.
//! 3. Collect the staged pending ids, oldest first, so the caller can merge
//!    them before new traffic.
//!
//! A crash after an append but before the pending file was deleted leaves a
//! record that is merged a second time here. Delivery across restarts is
//! therefore at-least-once.

use std::path::Path;

use super::errors::BrokerResult;
use crate::log::{self, LogScan, TailState, LOG_FILE_NAME};
use crate::observability::{Event, Logger};
use crate::pending::PendingStore;

/// What recovery found and changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// State of the log before any repair
    pub log: LogScan,
    /// Temp files deleted
    pub temp_files_removed: usize,
    /// Pending ids to merge, in merge order
    pub pending: Vec<String>,
}

impl RecoveryReport {
    /// Returns true if the torn tail was cut off
    pub fn tail_truncated(&self) -> bool {
        matches!(self.log.tail, TailState::Torn { .. })
    }
}

/// Bring the data directory back to a consistent state.
pub fn recover(data_dir: &Path, store: &PendingStore) -> BrokerResult<RecoveryReport> {
    let dir = data_dir.display().to_string();
    Logger::event(Event::RecoveryStart, &[("data_dir", dir.as_str())]);

    match run(data_dir, store) {
        Ok(report) => {
            let records = report.log.records.to_string();
            let pending = report.pending.len().to_string();
            Logger::event(
                Event::RecoveryComplete,
                &[("records", records.as_str()), ("pending", pending.as_str())],
            );
            Ok(report)
        }
        Err(e) => {
            let error = e.to_string();
            Logger::event(Event::RecoveryFailed, &[("error", error.as_str())]);
            Err(e)
        }
    }
}

fn run(data_dir: &Path, store: &PendingStore) -> BrokerResult<RecoveryReport> {
    let temp_files_removed = store.sweep_temp_files()?;
    if temp_files_removed > 0 {
        let count = temp_files_removed.to_string();
        Logger::event(Event::RecoveryTempSwept, &[("count", count.as_str())]);
    }

    let log_scan = log::repair_tail(&data_dir.join(LOG_FILE_NAME))?;
    if let TailState::Torn { offset, bytes } = log_scan.tail {
        let offset = offset.to_string();
        let bytes = bytes.to_string();
        Logger::event(
            Event::RecoveryTailTruncated,
            &[("offset", offset.as_str()), ("bytes", bytes.as_str())],
        );
    }

    let pending = store.list_pending()?;
    for id in &pending {
        Logger::event(Event::RecoveryRestaged, &[("id", id.as_str())]);
    }

    Ok(RecoveryReport {
        log: log_scan,
        temp_files_removed,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::errors::BrokerError;
    use crate::log::{encode, LogWriter, SyncMode};
    use crate::pending::PENDING_ID_LENGTH;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PendingStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = PendingStore::open(temp_dir.path(), PENDING_ID_LENGTH).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_empty_directory() {
        let (temp_dir, store) = setup();
        let report = recover(temp_dir.path(), &store).unwrap();

        assert_eq!(report.log.records, 0);
        assert_eq!(report.temp_files_removed, 0);
        assert!(report.pending.is_empty());
        assert!(!report.tail_truncated());
    }

    #[test]
    fn test_sweeps_temp_files_and_lists_pending() {
        let (temp_dir, store) = setup();
        fs::write(temp_dir.path().join(".abcdefghij"), b"half").unwrap();
        let id = store.stage(b"orphan").unwrap();

        let report = recover(temp_dir.path(), &store).unwrap();

        assert_eq!(report.temp_files_removed, 1);
        assert_eq!(report.pending, vec![id]);
        assert!(!temp_dir.path().join(".abcdefghij").exists());
    }

    #[test]
    fn test_truncates_torn_tail() {
        let (temp_dir, store) = setup();
        {
            let mut writer = LogWriter::open(temp_dir.path(), SyncMode::Os).unwrap();
            writer.append(b"first").unwrap();
        }
        let log_path = temp_dir.path().join(LOG_FILE_NAME);
        let good_len = fs::metadata(&log_path).unwrap().len();
        fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap()
            .write_all(b"@|^sec")
            .unwrap();

        let report = recover(temp_dir.path(), &store).unwrap();

        assert!(report.tail_truncated());
        assert_eq!(report.log.records, 1);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), good_len);
    }

    #[test]
    fn test_corruption_is_fatal() {
        let (temp_dir, store) = setup();
        let log_path = temp_dir.path().join(LOG_FILE_NAME);
        let mut bytes = b"garbage".to_vec();
        bytes.extend_from_slice(&encode(b"ok"));
        fs::write(&log_path, &bytes).unwrap();

        let err = recover(temp_dir.path(), &store).unwrap_err();
        match err {
            BrokerError::Log(log_err) => assert!(log_err.is_fatal()),
            other => panic!("expected log corruption, got {other:?}"),
        }
        // Corrupt log left untouched
        assert_eq!(fs::read(&log_path).unwrap(), bytes);
    }
}
