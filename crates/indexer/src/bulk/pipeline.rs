//! Bulk execution with bounded concurrency and retry.
//!
//! Each batch holds one semaphore permit for its whole lifetime, retries
//! included, so at most `concurrent_requests` batches talk to the cluster at
//! once. Whole-request failures that the cluster marks as transient are
//! retried on the [`BackoffPolicy`] schedule; so are individual items the
//! cluster pushed back with 429. Everything else gets its final
//! [`DocumentStatus`] from the first response that carried it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

use crate::bulk::backoff::BackoffPolicy;
use crate::bulk::listener::{BulkListener, LoggingListener};
use crate::config::BulkConfig;
use crate::core::{BulkItem, ClusterClient, RefreshPolicy};
use crate::error::{ProcessorError, TransportError};
use crate::types::{BatchOutcome, DocumentOutcome, DocumentStatus, MutationRecord};

/// Status code the cluster uses for item-level back-pressure.
const ITEM_BACK_PRESSURE: u16 = 429;

/// Executes batches against a cluster client.
pub struct BulkPipeline {
    client: Arc<dyn ClusterClient>,
    backoff: BackoffPolicy,
    listener: Arc<dyn BulkListener>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    next_execution_id: AtomicU64,
}

impl std::fmt::Debug for BulkPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkPipeline")
            .field("client", &self.client.name())
            .field("backoff", &self.backoff)
            .field("concurrency", &self.concurrency)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl BulkPipeline {
    /// Creates a pipeline that logs batch lifecycle through `tracing`.
    pub fn new(client: Arc<dyn ClusterClient>, config: &BulkConfig) -> Self {
        Self::with_listener(client, config, Arc::new(LoggingListener))
    }

    /// Creates a pipeline with a custom listener.
    pub fn with_listener(
        client: Arc<dyn ClusterClient>,
        config: &BulkConfig,
        listener: Arc<dyn BulkListener>,
    ) -> Self {
        let concurrency = config.concurrent_requests.max(1);
        Self {
            client,
            backoff: config.backoff(),
            listener,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            next_execution_id: AtomicU64::new(1),
        }
    }

    /// Returns the cluster client.
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Number of batches currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Executes a batch and waits for its outcome.
    pub async fn execute(
        &self,
        batch: Vec<MutationRecord>,
        refresh: RefreshPolicy,
    ) -> Result<BatchOutcome, ProcessorError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProcessorError::Closed)?;
        let execution_id = self.next_execution_id();
        Ok(self.run(execution_id, &batch, refresh).await)
    }

    /// Hands a batch to a background task once a concurrency slot is free.
    ///
    /// Returns the execution id as soon as the batch was accepted; its
    /// outcome goes to the listener.
    pub async fn submit(
        self: &Arc<Self>,
        batch: Vec<MutationRecord>,
    ) -> Result<u64, ProcessorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProcessorError::Closed)?;
        let execution_id = self.next_execution_id();

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.run(execution_id, &batch, RefreshPolicy::None).await;
        });

        Ok(execution_id)
    }

    /// Waits until no batch is in flight.
    pub async fn wait_idle(&self) {
        // The semaphore is never closed.
        if let Ok(all) = self.permits.acquire_many(self.concurrency as u32).await {
            drop(all);
        }
    }

    fn next_execution_id(&self) -> u64 {
        self.next_execution_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs one batch to completion, retries included.
    async fn run(
        &self,
        execution_id: u64,
        batch: &[MutationRecord],
        refresh: RefreshPolicy,
    ) -> BatchOutcome {
        let started = Instant::now();
        self.listener.before_bulk(execution_id, batch);

        let mut outcomes: Vec<Option<DocumentOutcome>> = vec![None; batch.len()];
        let mut pending: Vec<usize> = (0..batch.len()).collect();
        let mut delays = self.backoff.delays();
        let mut attempts: u32 = 0;

        while !pending.is_empty() {
            attempts += 1;

            let result = if pending.len() == batch.len() {
                self.client.bulk(batch, refresh).await
            } else {
                let subset: Vec<MutationRecord> =
                    pending.iter().map(|&i| batch[i].clone()).collect();
                self.client.bulk(&subset, refresh).await
            };

            let failure = match result {
                Ok(response) if response.items.len() != pending.len() => {
                    Some(TransportError::Decode {
                        backend_name: self.client.name().to_string(),
                        message: format!(
                            "bulk response has {} items for {} actions",
                            response.items.len(),
                            pending.len()
                        ),
                    })
                }
                Ok(response) => {
                    let mut retry = Vec::new();
                    for (&position, item) in pending.iter().zip(response.items) {
                        if item.status == ITEM_BACK_PRESSURE {
                            retry.push(position);
                        } else {
                            outcomes[position] = Some(classify(&batch[position], item));
                        }
                    }

                    if !retry.is_empty() {
                        match delays.next() {
                            Some(delay) => {
                                warn!(
                                    execution_id = execution_id,
                                    attempt = attempts,
                                    rejected = retry.len(),
                                    delay_ms = delay.as_millis() as u64,
                                    "Bulk items rejected by back-pressure, retrying"
                                );
                                sleep(delay).await;
                            }
                            None => {
                                error!(
                                    execution_id = execution_id,
                                    attempts = attempts,
                                    rejected = retry.len(),
                                    "Bulk items still rejected after all retries"
                                );
                                let reason = format!(
                                    "rejected with status {} after {} attempts",
                                    ITEM_BACK_PRESSURE, attempts
                                );
                                for &position in &retry {
                                    outcomes[position] =
                                        Some(transport_outcome(&batch[position], &reason));
                                }
                                retry.clear();
                            }
                        }
                    }

                    pending = retry;
                    None
                }
                Err(e) => Some(e),
            };

            let Some(e) = failure else {
                continue;
            };

            if e.is_retryable() {
                if let Some(delay) = delays.next() {
                    warn!(
                        execution_id = execution_id,
                        attempt = attempts,
                        max_retries = self.backoff.max_retries(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Bulk attempt failed, retrying"
                    );
                    sleep(delay).await;
                    continue;
                }
            }

            error!(
                execution_id = execution_id,
                attempts = attempts,
                actions = pending.len(),
                error = %e,
                "Bulk request failed"
            );
            let reason = e.to_string();
            for &position in &pending {
                outcomes[position] = Some(transport_outcome(&batch[position], &reason));
            }
            pending.clear();
        }

        if attempts > 1 {
            debug!(
                execution_id = execution_id,
                attempts = attempts,
                "Bulk finished after retries"
            );
        }

        let outcomes = outcomes
            .into_iter()
            .zip(batch)
            .map(|(outcome, record)| {
                outcome.unwrap_or_else(|| transport_outcome(record, "no response for action"))
            })
            .collect();

        let outcome = BatchOutcome {
            execution_id,
            outcomes,
            took: started.elapsed(),
        };
        self.listener.after_bulk(execution_id, batch, &outcome);
        outcome
    }
}

fn classify(record: &MutationRecord, item: BulkItem) -> DocumentOutcome {
    DocumentOutcome {
        index: record.index.clone(),
        id: record.id.clone().or(item.id),
        status: DocumentStatus::classify(item.status, record.is_creation_only()),
        status_code: Some(item.status),
        reason: item.error,
    }
}

fn transport_outcome(record: &MutationRecord, reason: &str) -> DocumentOutcome {
    DocumentOutcome::transport_error(record.index.clone(), record.id.clone(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryCluster;
    use serde_json::json;
    use std::time::Duration;

    fn config(concurrent_requests: usize, max_retries: u32) -> BulkConfig {
        BulkConfig {
            concurrent_requests,
            max_retries,
            initial_backoff_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn docs(n: usize) -> Vec<MutationRecord> {
        (0..n)
            .map(|i| MutationRecord::index_doc("idx", Some(i.to_string()), json!({"n": i}).into()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_success() {
        let cluster = Arc::new(InMemoryCluster::new());
        let pipeline = BulkPipeline::new(cluster.clone(), &config(1, 3));

        let outcome = pipeline.execute(docs(3), RefreshPolicy::None).await.unwrap();
        assert_eq!(outcome.execution_id, 1);
        assert_eq!(outcome.count(DocumentStatus::Success), 3);
        assert_eq!(cluster.document_count("idx"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_not_retried() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail_next_bulk(
            5,
            TransportError::Status {
                backend_name: "memory".to_string(),
                status: 400,
                message: "malformed".to_string(),
            },
        );
        let pipeline = BulkPipeline::new(cluster.clone(), &config(1, 3));

        let outcome = pipeline.execute(docs(2), RefreshPolicy::None).await.unwrap();
        assert!(!outcome.batch_succeeded());
        assert_eq!(cluster.bulk_call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail_next_bulk(
            2,
            TransportError::Connection {
                backend_name: "memory".to_string(),
                message: "reset".to_string(),
            },
        );
        let pipeline = BulkPipeline::new(cluster.clone(), &config(1, 3));

        let outcome = pipeline.execute(docs(2), RefreshPolicy::None).await.unwrap();
        assert!(!outcome.has_failures());
        assert_eq!(cluster.bulk_call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_back_pressure_retries_only_rejected_items() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.reject_items("idx", "1", 2);
        let pipeline = BulkPipeline::new(cluster.clone(), &config(1, 3));

        let outcome = pipeline.execute(docs(3), RefreshPolicy::None).await.unwrap();
        assert!(!outcome.has_failures());

        let calls = cluster.bulk_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].ids.len(), 3);
        assert_eq!(calls[1].ids, vec![Some("1".to_string())]);
        assert_eq!(calls[2].ids, vec![Some("1".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_back_pressure_exhausts_to_transport_error() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.reject_items("idx", "0", 10);
        let pipeline = BulkPipeline::new(cluster.clone(), &config(1, 2));

        let outcome = pipeline.execute(docs(2), RefreshPolicy::None).await.unwrap();
        assert_eq!(outcome.outcomes[0].status, DocumentStatus::TransportError);
        assert_eq!(outcome.outcomes[1].status, DocumentStatus::Success);
        assert_eq!(cluster.bulk_call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_respects_concurrency() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.set_bulk_latency(Duration::from_secs(1));
        let pipeline = Arc::new(BulkPipeline::new(cluster.clone(), &config(2, 0)));

        pipeline.submit(docs(1)).await.unwrap();
        pipeline.submit(docs(1)).await.unwrap();
        assert_eq!(pipeline.in_flight(), 2);

        // The third batch waits for a slot.
        let third = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.submit(docs(1)).await }
        });
        tokio::task::yield_now().await;
        assert!(!third.is_finished());

        pipeline.wait_idle().await;
        assert_eq!(third.await.unwrap().unwrap(), 3);
        pipeline.wait_idle().await;
        assert_eq!(cluster.bulk_call_count(), 3);
        assert!(cluster.max_concurrent_bulk() <= 2);
    }
}
