//! # Broker
//!
//! The network-facing half of blobcast.
//!
//! ## Pipeline
//!
//! - **Server**: accept loop, opcode dispatch
//! - **Ingest**: read a producer payload, stage it, queue its id, reply `ack`
//! - **Merger**: the single log writer; append, broadcast, delete, in order
//! - **Registry**: live subscribers and their outbound queues
//! - **Recovery**: bring the data directory back before serving
//!
//! Ingestion and merging meet only at the bounded merge queue. The
//! registry is the only shared mutable state.

pub mod config;
pub mod errors;
pub mod ingest;
pub mod merger;
pub mod recovery;
pub mod registry;
pub mod server;

pub use config::{AckMode, BrokerConfig, MergeFailurePolicy, ProducerFraming};
pub use errors::{BrokerError, BrokerResult};
pub use ingest::{read_payload, Ingestor, ACK};
pub use merger::{merge_queue, MergeOutcome, MergeQueue, MergeRequest, Merger, MergerExit, MergerHandle};
pub use recovery::{recover, RecoveryReport};
pub use registry::{BroadcastOutcome, Payload, SubscriberRegistry};
pub use server::{Broker, Opcode, BAD_REQUEST, OP_READ, OP_WRITE};
