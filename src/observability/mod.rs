//! Observability for the broker
//!
//! - Structured JSON logging with typed events
//! - Monotonic counters
//!
//! ```ignore
//! use blobcast::observability::{Event, Logger};
//!
//! Logger::event(Event::MergeComplete, &[("id", "Xa81kPq0Zr")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
