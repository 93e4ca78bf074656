//! Observable broker events
//!
//! Every log line the broker emits names one of these.

use std::fmt;

use super::logger::Severity;

/// Observable events in the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Startup begins
    BootStart,
    /// Listening socket bound, accepting connections
    Serving,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,
    /// Configuration loaded
    ConfigLoaded,

    // Recovery
    /// Startup recovery begins
    RecoveryStart,
    /// Torn record dropped from the end of the log
    RecoveryTailTruncated,
    /// Leftover temp files removed
    RecoveryTempSwept,
    /// Leftover pending record queued again
    RecoveryRestaged,
    /// Startup recovery complete
    RecoveryComplete,
    /// Startup recovery failed (FATAL)
    RecoveryFailed,

    // Connections
    /// Accept on the listening socket failed
    AcceptFailed,
    /// Unknown opcode or unreadable handshake
    BadRequest,
    /// Producer payload staged and queued
    IngestAccepted,
    /// Producer request aborted
    IngestFailed,

    // Merge
    /// Record appended and broadcast
    MergeComplete,
    /// One merge failed; worker continues
    MergeFailed,
    /// Worker stopped after a failure (FATAL)
    MergerHalted,

    // Subscribers
    /// Subscriber registered
    SubscriberAdded,
    /// Subscriber removed after a failed or slow write
    SubscriberEvicted,
    /// Subscriber connection reset by the peer
    SubscriberClosed,
    /// Registration refused (registry shut down or full)
    SubscriberRejected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "BROKER_STARTUP_BEGIN",
            Event::Serving => "BROKER_SERVING",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::RecoveryStart => "RECOVERY_BEGIN",
            Event::RecoveryTailTruncated => "LOG_TAIL_TRUNCATED",
            Event::RecoveryTempSwept => "PENDING_TEMP_SWEPT",
            Event::RecoveryRestaged => "PENDING_RESTAGED",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",

            Event::AcceptFailed => "ACCEPT_FAILED",
            Event::BadRequest => "BAD_REQUEST",
            Event::IngestAccepted => "INGEST_ACCEPTED",
            Event::IngestFailed => "INGEST_FAILED",

            Event::MergeComplete => "MERGE_COMPLETE",
            Event::MergeFailed => "MERGE_FAILED",
            Event::MergerHalted => "MERGER_HALTED",

            Event::SubscriberAdded => "SUBSCRIBER_ADDED",
            Event::SubscriberEvicted => "SUBSCRIBER_EVICTED",
            Event::SubscriberClosed => "SUBSCRIBER_CLOSED",
            Event::SubscriberRejected => "SUBSCRIBER_REJECTED",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::MergeComplete | Event::IngestAccepted => Severity::Trace,
            Event::AcceptFailed
            | Event::BadRequest
            | Event::RecoveryTailTruncated
            | Event::RecoveryRestaged
            | Event::SubscriberEvicted
            | Event::SubscriberRejected => Severity::Warn,
            Event::IngestFailed | Event::MergeFailed => Severity::Error,
            Event::RecoveryFailed | Event::MergerHalted => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
