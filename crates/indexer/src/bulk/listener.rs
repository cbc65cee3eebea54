//! Hooks around bulk execution.

use tracing::{info, warn};

use crate::types::{BatchOutcome, MutationRecord};

/// Observes batches before and after execution.
///
/// Hooks run on the pipeline's tasks and must not block.
pub trait BulkListener: Send + Sync {
    /// Called before the first attempt of a batch.
    fn before_bulk(&self, execution_id: u64, batch: &[MutationRecord]);

    /// Called once every mutation of the batch has a final status.
    fn after_bulk(&self, execution_id: u64, batch: &[MutationRecord], outcome: &BatchOutcome);
}

/// Logs batch lifecycle through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl BulkListener for LoggingListener {
    fn before_bulk(&self, execution_id: u64, batch: &[MutationRecord]) {
        info!(
            execution_id = execution_id,
            actions = batch.len(),
            "Executing bulk"
        );
    }

    fn after_bulk(&self, execution_id: u64, _batch: &[MutationRecord], outcome: &BatchOutcome) {
        if !outcome.batch_succeeded() {
            warn!(
                execution_id = execution_id,
                took_ms = outcome.took.as_millis() as u64,
                failure = %outcome.failure_message(),
                "Bulk failed to reach the cluster"
            );
        } else if outcome.has_failures() {
            warn!(
                execution_id = execution_id,
                took_ms = outcome.took.as_millis() as u64,
                failure = %outcome.failure_message(),
                "Bulk executed with failures"
            );
        } else {
            info!(
                execution_id = execution_id,
                took_ms = outcome.took.as_millis() as u64,
                actions = outcome.len(),
                "Bulk completed"
            );
        }
    }
}
