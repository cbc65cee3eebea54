//! Buffered, resilient bulk execution.
//!
//! - [`WriteBuffer`] - Pending mutations with count and byte limits
//! - [`BulkPipeline`] - Bounded-concurrency execution with retry
//! - [`BulkProcessor`] - Buffer, flush scheduler and dispatcher in one handle
//! - [`BulkListener`] - Before/after hooks, [`LoggingListener`] by default
//! - [`BackoffPolicy`] - Exponential retry schedule

mod backoff;
mod buffer;
mod listener;
mod pipeline;
mod processor;
mod scheduler;

pub use backoff::BackoffPolicy;
pub use buffer::{DueCheck, WriteBuffer};
pub use listener::{BulkListener, LoggingListener};
pub use pipeline::BulkPipeline;
pub use processor::{BulkProcessor, ShutdownStatus};
