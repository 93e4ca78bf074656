//! Pending store
//!
//! Inbound blobs are materialized here, under a random id, before the id is
//! handed to the merge queue. The merger deletes each file once its record
//! is in the durable log; whatever is left on startup is re-queued.

mod errors;
mod id;
mod store;

pub use errors::{PendingError, PendingResult};
pub use id::{is_valid_id, random_id, PENDING_ID_LENGTH, SUBSCRIBER_ID_LENGTH};
pub use store::PendingStore;
