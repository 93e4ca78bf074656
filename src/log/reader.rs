//! Durable log reader and tail repair
//!
//! Frames are read strictly in file order. A frame that stops at end of file
//! is a torn tail left by a crash mid-append; anything that cannot be a
//! frame at all is corruption.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use super::errors::{LogError, LogResult};
use super::frame::{scan_frame, FrameScan};
use super::writer::LOG_FILE_NAME;

const READ_CHUNK: usize = 64 * 1024;

/// One decoded record and where it starts in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Byte offset of the start marker
    pub offset: u64,
    /// Decoded payload
    pub payload: Vec<u8>,
}

/// State of the bytes after the last complete record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// The file ends exactly on a record boundary
    Clean,
    /// An incomplete record starts at `offset` and runs `bytes` to EOF
    Torn { offset: u64, bytes: u64 },
}

/// Summary of a full scan of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogScan {
    /// Complete records found
    pub records: u64,
    /// Length of the file up to the end of the last complete record
    pub valid_len: u64,
    pub tail: TailState,
}

enum Next {
    Record(LogEntry),
    End,
    Torn,
}

/// Sequential reader over the log file.
pub struct LogReader {
    log_path: PathBuf,
    reader: BufReader<File>,
    /// Bytes read from disk but not yet consumed as frames
    pending: Vec<u8>,
    /// File offset of `pending[0]`
    offset: u64,
    eof: bool,
}

impl LogReader {
    /// Opens a log file for reading.
    pub fn open(log_path: &Path) -> LogResult<Self> {
        let file = File::open(log_path).map_err(|e| {
            LogError::corruption(format!("Failed to open log file: {}: {}", log_path.display(), e))
        })?;

        Ok(Self {
            log_path: log_path.to_path_buf(),
            reader: BufReader::new(file),
            pending: Vec::new(),
            offset: 0,
            eof: false,
        })
    }

    /// Opens `<data_dir>/log_000`.
    pub fn open_from_data_dir(data_dir: &Path) -> LogResult<Self> {
        Self::open(&data_dir.join(LOG_FILE_NAME))
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at a clean end of file. A torn tail is reported as
    /// corruption here; use [`scan`] to tolerate it.
    pub fn read_next(&mut self) -> LogResult<Option<LogEntry>> {
        match self.next_frame()? {
            Next::Record(entry) => Ok(Some(entry)),
            Next::End => Ok(None),
            Next::Torn => Err(LogError::corruption_at_offset(
                self.offset,
                format!("Truncated record: {} bytes before end of file", self.pending.len()),
            )),
        }
    }

    /// Reads all remaining records.
    pub fn read_all(&mut self) -> LogResult<Vec<LogEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn next_frame(&mut self) -> LogResult<Next> {
        loop {
            match scan_frame(&self.pending) {
                FrameScan::Complete { payload, consumed } => {
                    let entry = LogEntry {
                        offset: self.offset,
                        payload,
                    };
                    self.pending.drain(..consumed);
                    self.offset += consumed as u64;
                    return Ok(Next::Record(entry));
                }
                FrameScan::Invalid { at, reason } => {
                    return Err(LogError::corruption_at_offset(self.offset + at as u64, reason));
                }
                FrameScan::Incomplete if self.eof => {
                    return Ok(if self.pending.is_empty() {
                        Next::End
                    } else {
                        Next::Torn
                    });
                }
                FrameScan::Incomplete => self.fill()?,
            }
        }
    }

    fn fill(&mut self) -> LogResult<()> {
        let start = self.pending.len();
        self.pending.resize(start + READ_CHUNK, 0);
        let read = loop {
            match self.reader.read(&mut self.pending[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pending.truncate(start);
                    return Err(LogError::corruption(format!(
                        "Failed to read log file {}: {}",
                        self.log_path.display(),
                        e
                    )));
                }
            }
        };
        self.pending.truncate(start + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

/// Scans the whole log, tolerating a torn final record.
///
/// A missing log file scans as empty.
pub fn scan(log_path: &Path) -> LogResult<LogScan> {
    if !log_path.exists() {
        return Ok(LogScan {
            records: 0,
            valid_len: 0,
            tail: TailState::Clean,
        });
    }

    let mut reader = LogReader::open(log_path)?;
    let mut records = 0;
    loop {
        match reader.next_frame()? {
            Next::Record(_) => records += 1,
            Next::End => {
                return Ok(LogScan {
                    records,
                    valid_len: reader.offset,
                    tail: TailState::Clean,
                })
            }
            Next::Torn => {
                return Ok(LogScan {
                    records,
                    valid_len: reader.offset,
                    tail: TailState::Torn {
                        offset: reader.offset,
                        bytes: reader.pending.len() as u64,
                    },
                })
            }
        }
    }
}

/// Scans the log and cuts off a torn final record, if any.
///
/// Corruption anywhere else is returned as a fatal error and the file is
/// left untouched.
pub fn repair_tail(log_path: &Path) -> LogResult<LogScan> {
    let result = scan(log_path)?;

    if let TailState::Torn { .. } = result.tail {
        let file = OpenOptions::new().write(true).open(log_path).map_err(|e| {
            LogError::append_failed(
                format!("Failed to open log for tail repair: {}", log_path.display()),
                e,
            )
        })?;
        file.set_len(result.valid_len).map_err(|e| {
            LogError::append_failed(
                format!("Failed to truncate log to {} bytes", result.valid_len),
                e,
            )
        })?;
        file.sync_all()
            .map_err(|e| LogError::fsync_failed("fsync failed after log tail repair", e))?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::frame::encode;
    use crate::log::writer::{LogWriter, SyncMode};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_log(dir: &Path, payloads: &[&[u8]]) -> PathBuf {
        let mut writer = LogWriter::open(dir, SyncMode::Os).unwrap();
        for payload in payloads {
            writer.append(payload).unwrap();
        }
        writer.path().to_path_buf()
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_read_all_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(temp_dir.path(), &[b"A", b"hello|world", b""]);

        let entries = LogReader::open(&path).unwrap().read_all().unwrap();

        let payloads: Vec<_> = entries.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(payloads, vec![b"A".to_vec(), b"hello|world".to_vec(), Vec::new()]);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, encode(b"A").len() as u64);
    }

    #[test]
    fn test_records_larger_than_read_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let big: Vec<u8> = (0..READ_CHUNK * 2 + 7).map(|i| (i % 251) as u8).collect();
        let path = write_log(temp_dir.path(), &[&big, b"after"]);

        let entries = LogReader::open(&path).unwrap().read_all().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, big);
        assert_eq!(entries[1].payload, b"after");
    }

    #[test]
    fn test_torn_tail_is_error_for_read_all() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(temp_dir.path(), &[b"A"]);
        append_raw(&path, b"@|^partial");

        let mut reader = LogReader::open(&path).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().payload, b"A");
        assert!(reader.read_next().is_err());
    }

    #[test]
    fn test_scan_reports_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(temp_dir.path(), &[b"A", b"B"]);
        let valid_len = fs::metadata(&path).unwrap().len();
        append_raw(&path, b"@|^torn||");

        let result = scan(&path).unwrap();

        assert_eq!(result.records, 2);
        assert_eq!(result.valid_len, valid_len);
        assert_eq!(
            result.tail,
            TailState::Torn {
                offset: valid_len,
                bytes: 9
            }
        );
    }

    #[test]
    fn test_repair_tail_truncates_and_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(temp_dir.path(), &[b"A", b"B"]);
        let valid_len = fs::metadata(&path).unwrap().len();
        append_raw(&path, b"@|");

        repair_tail(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
        let entries = LogReader::open(&path).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(scan(&path).unwrap().tail, TailState::Clean);
    }

    #[test]
    fn test_repair_tail_refuses_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(temp_dir.path(), &[b"A"]);
        append_raw(&path, b"garbage");
        let len_before = fs::metadata(&path).unwrap().len();

        let err = repair_tail(&path).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.details(), Some("byte_offset: 7"));
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let result = scan(&temp_dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(result.records, 0);
        assert_eq!(result.tail, TailState::Clean);
    }
}
