//! Durable log subsystem
//!
//! A single append-only file of self-delimiting records. A blob is
//! committed once its record has been appended here; it is broadcast only
//! afterwards.
//!
//! # Format
//!
//! Each record is `@|^` + payload with every `|` doubled + `@|$`, with no
//! separator between records.
//!
//! # Ownership
//!
//! Exactly one [`LogWriter`] exists per broker and it belongs to the merger.
//! Readers are used for startup validation and offline inspection only.

mod errors;
mod frame;
mod reader;
mod writer;

pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use frame::{decode, encode, scan_frame, FrameScan, END_MARKER, START_MARKER};
pub use reader::{repair_tail, scan, LogEntry, LogReader, LogScan, TailState};
pub use writer::{LogWriter, SyncMode, LOG_FILE_NAME};
