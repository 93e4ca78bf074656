//! Broker Configuration
//!
//! Loaded from a JSON file. Only `data_dir` is required; every other field
//! has a default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{BrokerError, BrokerResult};
use crate::log::SyncMode;
use crate::pending::{PENDING_ID_LENGTH, SUBSCRIBER_ID_LENGTH};

/// How a producer delimits its payload after the `w` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerFraming {
    /// 4-byte big-endian length, then the payload
    #[default]
    LengthPrefixed,
    /// Everything until the producer half-closes its write side
    UntilEof,
    /// One read into a `max_payload_bytes` buffer; larger sends are truncated
    SingleRead,
}

/// When a producer receives `ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// After the blob is staged on disk and queued for merge
    #[default]
    Staged,
    /// After the record is appended to the durable log
    Merged,
}

/// What the merger does when a merge fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFailurePolicy {
    /// Log, keep the pending file, continue with the next id
    #[default]
    Isolate,
    /// Log and stop the merger; the broker shuts down
    Halt,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Directory holding the log, pending files and temp files (required).
    /// Reserved for the broker: other files named like a pending id are
    /// merged and deleted at startup.
    pub data_dir: String,

    /// Address of the listening socket (default: "0.0.0.0:8181")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub producer_framing: ProducerFraming,

    /// Largest accepted payload (default: 1 MiB)
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Bound of the merge queue; producers stall when it is full (default: 1024)
    #[serde(default = "default_merge_queue_capacity")]
    pub merge_queue_capacity: usize,

    /// Undelivered payloads held per subscriber before eviction (default: 256)
    #[serde(default = "default_subscriber_queue_depth")]
    pub subscriber_queue_depth: usize,

    /// Limit for reading the opcode and the payload (default: 30s)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Limit for one write to a subscriber (default: 5s)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default)]
    pub ack_mode: AckMode,

    #[serde(default)]
    pub merge_failure_policy: MergeFailurePolicy,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_pending_id_length")]
    pub pending_id_length: usize,

    #[serde(default = "default_subscriber_id_length")]
    pub subscriber_id_length: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8181".to_string()
}
fn default_max_payload_bytes() -> usize {
    1024 * 1024
}
fn default_merge_queue_capacity() -> usize {
    1024
}
fn default_subscriber_queue_depth() -> usize {
    256
}
fn default_read_timeout_ms() -> u64 {
    30_000
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_pending_id_length() -> usize {
    PENDING_ID_LENGTH
}
fn default_subscriber_id_length() -> usize {
    SUBSCRIBER_ID_LENGTH
}

impl BrokerConfig {
    /// Create a config with every default and the given data directory
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            listen_addr: default_listen_addr(),
            producer_framing: ProducerFraming::default(),
            max_payload_bytes: default_max_payload_bytes(),
            merge_queue_capacity: default_merge_queue_capacity(),
            subscriber_queue_depth: default_subscriber_queue_depth(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            ack_mode: AckMode::default(),
            merge_failure_policy: MergeFailurePolicy::default(),
            sync_mode: SyncMode::default(),
            pending_id_length: default_pending_id_length(),
            subscriber_id_length: default_subscriber_id_length(),
        }
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> BrokerResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: BrokerConfig = serde_json::from_str(&content)
            .map_err(|e| BrokerError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the broker cannot run with
    pub fn validate(&self) -> BrokerResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(BrokerError::Config("data_dir must not be empty".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(BrokerError::Config("max_payload_bytes must be > 0".into()));
        }
        if self.producer_framing == ProducerFraming::LengthPrefixed
            && self.max_payload_bytes as u64 > u32::MAX as u64
        {
            return Err(BrokerError::Config(
                "max_payload_bytes must fit a 32-bit length prefix".into(),
            ));
        }
        // An unbounded queue would hide overload instead of stalling producers
        if self.merge_queue_capacity == 0 {
            return Err(BrokerError::Config("merge_queue_capacity must be > 0".into()));
        }
        if self.subscriber_queue_depth == 0 {
            return Err(BrokerError::Config("subscriber_queue_depth must be > 0".into()));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(BrokerError::Config("timeouts must be > 0".into()));
        }
        if self.pending_id_length == 0 || self.subscriber_id_length == 0 {
            return Err(BrokerError::Config("id lengths must be > 0".into()));
        }
        Ok(())
    }

    /// Get data directory as Path
    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Address a local client should dial to reach this broker
    ///
    /// An unspecified bind address (`0.0.0.0`, `[::]`) becomes loopback.
    pub fn client_addr(&self) -> String {
        if let Some(port) = self.listen_addr.strip_prefix("0.0.0.0:") {
            format!("127.0.0.1:{}", port)
        } else if let Some(port) = self.listen_addr.strip_prefix("[::]:") {
            format!("[::1]:{}", port)
        } else if let Some(port) = self.listen_addr.strip_prefix(':') {
            format!("127.0.0.1:{}", port)
        } else {
            self.listen_addr.clone()
        }
    }
}
