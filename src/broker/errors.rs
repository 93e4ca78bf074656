//! # Broker Errors
//!
//! Error types for connection handling, merging and startup.

use std::io;

use thiserror::Error;

use crate::log::LogError;
use crate::pending::PendingError;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    // ==================
    // Protocol Errors
    // ==================
    /// First byte was neither `w` nor `r`
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Peer closed the connection early
    #[error("Connection closed while reading {0}")]
    ConnectionClosed(&'static str),

    /// Peer was too slow
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Payload exceeds `max_payload_bytes`
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: usize },

    /// Broker closed the connection without acknowledging
    #[error("Publish not acknowledged: {0:?}")]
    NotAcknowledged(String),

    // ==================
    // Pipeline Errors
    // ==================
    /// Durable log failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Pending store failure
    #[error(transparent)]
    Pending(#[from] PendingError),

    /// The merger is gone; nothing more can be queued
    #[error("Merge queue closed")]
    MergeQueueClosed,

    /// The merger could not commit this record
    #[error("Merge failed for pending record {0}")]
    MergeFailed(String),

    /// The merger stopped under the halt policy
    #[error("Merger halted after a merge failure")]
    MergerHalted,

    // ==================
    // Registry Errors
    // ==================
    /// Registry no longer accepts subscribers
    #[error("Subscriber registry is shut down")]
    RegistryClosed,

    /// Every id of the configured length is taken
    #[error("Subscriber registry full ({0} subscribers)")]
    RegistryFull(usize),

    // ==================
    // Startup Errors
    // ==================
    /// Listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ==================
    // Internal Errors
    // ==================
    /// Socket or task I/O
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Returns true for errors caused by the remote peer rather than the broker
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BrokerError::UnknownOpcode(_)
                | BrokerError::ConnectionClosed(_)
                | BrokerError::Timeout(_)
                | BrokerError::PayloadTooLarge { .. }
        )
    }
}
