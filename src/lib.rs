//! blobcast - A durable publish/subscribe broker
//!
//! Producers push opaque blobs over TCP. Each blob is staged on disk,
//! appended to a single append-only log by one sequential merger, then
//! pushed to every connected subscriber.

pub mod broker;
pub mod cli;
pub mod client;
pub mod log;
pub mod observability;
pub mod pending;
