//! Test fixtures: seeded clusters, records and configurations.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use helios_indexer::backends::memory::InMemoryCluster;
use helios_indexer::bulk::BulkListener;
use helios_indexer::config::{BulkConfig, ScrollConfig};
use helios_indexer::types::{BatchOutcome, MutationRecord};

/// Index used by most tests.
pub const INDEX: &str = "patients";

/// Zero-padded document id, so ids sort like their numbers.
pub fn doc_id(n: usize) -> String {
    format!("p-{:04}", n)
}

/// A small patient document.
pub fn patient(n: usize) -> Value {
    json!({
        "n": n,
        "name": format!("patient {}", n),
        "active": n % 2 == 0,
        "ward": if n % 3 == 0 { "north" } else { "south" },
    })
}

/// An empty in-memory cluster.
pub fn cluster() -> Arc<InMemoryCluster> {
    Arc::new(InMemoryCluster::new())
}

/// A cluster holding `count` patients in [`INDEX`], inserted in id order.
pub fn seeded_cluster(count: usize) -> Arc<InMemoryCluster> {
    let cluster = cluster();
    cluster.create_index(INDEX);
    for n in 0..count {
        cluster.insert(INDEX, &doc_id(n), patient(n));
    }
    cluster
}

/// Indexes patient `n` under its id.
pub fn index_record(n: usize) -> MutationRecord {
    MutationRecord::index_doc(INDEX, Some(doc_id(n)), patient(n).into())
}

/// Creates patient `n` only if its id is new.
pub fn create_record(n: usize) -> MutationRecord {
    MutationRecord::create_doc(INDEX, Some(doc_id(n)), patient(n).into())
}

/// Bulk settings with the given limits and otherwise fast retries.
pub fn bulk_config(max_batch_count: usize, max_batch_bytes: usize, flush_interval: Duration) -> BulkConfig {
    BulkConfig {
        max_batch_count,
        max_batch_bytes,
        flush_interval,
        initial_backoff_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Bulk settings that only flush on demand, with the given retry schedule.
pub fn retry_config(initial_backoff_delay: Duration, max_retries: u32) -> BulkConfig {
    BulkConfig {
        flush_interval: Duration::from_secs(3600),
        initial_backoff_delay,
        max_retries,
        ..Default::default()
    }
}

/// Scroll settings with the given page size and keep-alive.
pub fn scroll_config(page_size: usize, ttl: Duration) -> ScrollConfig {
    ScrollConfig { ttl, page_size }
}

/// A listener that keeps every finished batch.
#[derive(Debug, Default)]
pub struct RecordingListener {
    started: Mutex<Vec<(u64, usize)>>,
    finished: Mutex<Vec<BatchOutcome>>,
}

impl RecordingListener {
    /// Creates an empty listener.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(execution_id, batch size)` of every started batch.
    pub fn started(&self) -> Vec<(u64, usize)> {
        self.started.lock().clone()
    }

    /// Outcomes of every finished batch, in completion order.
    pub fn finished(&self) -> Vec<BatchOutcome> {
        self.finished.lock().clone()
    }

    /// Number of mutations across finished batches.
    pub fn finished_mutations(&self) -> usize {
        self.finished.lock().iter().map(BatchOutcome::len).sum()
    }
}

impl BulkListener for RecordingListener {
    fn before_bulk(&self, execution_id: u64, batch: &[MutationRecord]) {
        self.started.lock().push((execution_id, batch.len()));
    }

    fn after_bulk(&self, _execution_id: u64, _batch: &[MutationRecord], outcome: &BatchOutcome) {
        self.finished.lock().push(outcome.clone());
    }
}
