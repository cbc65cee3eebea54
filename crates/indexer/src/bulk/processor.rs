//! The asynchronous bulk processor.
//!
//! Producers call [`BulkProcessor::enqueue`] from any thread. Batches leave
//! the buffer when a size limit is crossed, when the flush interval elapses
//! or on an explicit [`flush`](BulkProcessor::flush), and travel over an
//! unbounded channel to a single dispatcher task, which waits for a pipeline
//! slot and hands each batch over. Producers therefore never wait on the
//! network.
//!
//! ```text
//! enqueue ──► WriteBuffer ──drain──► dispatcher ──submit──► BulkPipeline ──► cluster
//!                 ▲                                              │
//!           FlushScheduler                                 BulkListener
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bulk::buffer::WriteBuffer;
use crate::bulk::pipeline::BulkPipeline;
use crate::bulk::scheduler::FlushScheduler;
use crate::config::BulkConfig;
use crate::error::{IndexerResult, ProcessorError};
use crate::types::MutationRecord;

/// A drained batch on its way to the dispatcher, with an optional
/// acknowledgement sent once the pipeline accepted it.
#[derive(Debug)]
pub(crate) struct Dispatch {
    batch: Option<Vec<MutationRecord>>,
    accepted: Option<oneshot::Sender<()>>,
}

impl Dispatch {
    pub(crate) fn batch(batch: Vec<MutationRecord>) -> Self {
        Self {
            batch: Some(batch),
            accepted: None,
        }
    }
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Every batch finished.
    Complete,
    /// The timeout elapsed with batches still running.
    Incomplete {
        /// Batches still holding a pipeline slot.
        in_flight: usize,
    },
}

impl ShutdownStatus {
    /// Returns true for [`ShutdownStatus::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, ShutdownStatus::Complete)
    }
}

/// Buffers mutations and executes them in the background.
#[derive(Debug)]
pub struct BulkProcessor {
    buffer: Arc<WriteBuffer>,
    pipeline: Arc<BulkPipeline>,
    sender: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    scheduler: Mutex<Option<FlushScheduler>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BulkProcessor {
    /// Starts the scheduler and dispatcher tasks.
    ///
    /// Must be called from within a tokio runtime. Fails if `config` is
    /// invalid.
    pub fn start(pipeline: Arc<BulkPipeline>, config: &BulkConfig) -> IndexerResult<Self> {
        config.validate()?;

        let buffer = Arc::new(WriteBuffer::new(
            config.max_batch_count,
            config.max_batch_bytes,
        ));
        let (sender, receiver) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch_loop(receiver, Arc::clone(&pipeline)));
        let scheduler =
            FlushScheduler::spawn(Arc::clone(&buffer), config.flush_interval, sender.clone());

        info!(
            max_batch_count = config.max_batch_count,
            max_batch_bytes = config.max_batch_bytes,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            concurrent_requests = config.concurrent_requests,
            "Bulk processor started"
        );

        Ok(Self {
            buffer,
            pipeline,
            sender: Mutex::new(Some(sender)),
            scheduler: Mutex::new(Some(scheduler)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Adds a mutation to the buffer.
    ///
    /// Never waits on the network. The document-level outcome is reported to
    /// the pipeline's listener, not to the caller.
    pub fn enqueue(&self, record: MutationRecord) -> IndexerResult<()> {
        record.validate()?;

        // The sender lock is held from push to send so shutdown cannot
        // close the channel while a drained batch is in hand.
        let sender = self.sender.lock();
        if let Some(batch) = self.buffer.push(record)? {
            send(sender.as_ref(), Dispatch::batch(batch))?;
        }
        Ok(())
    }

    /// Drains the buffer and waits until the pipeline accepted the batch.
    ///
    /// Returns once the batch holds a concurrency slot, not once the cluster
    /// confirmed it.
    pub async fn flush(&self) -> IndexerResult<()> {
        let (accepted, acknowledged) = oneshot::channel();
        {
            let sender = self.sender.lock();
            if self.buffer.is_closed() {
                return Err(ProcessorError::Closed.into());
            }
            send(
                sender.as_ref(),
                Dispatch {
                    batch: self.buffer.drain(),
                    accepted: Some(accepted),
                },
            )?;
        }

        acknowledged
            .await
            .map_err(|_| ProcessorError::DispatcherGone.into())
    }

    /// Stops accepting mutations and waits up to `timeout` for everything
    /// buffered or in flight to finish.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        let (remaining, sender) = {
            let mut sender = self.sender.lock();
            (self.buffer.close(), sender.take())
        };
        let scheduler = self.scheduler.lock().take();
        let dispatcher = self.dispatcher.lock().take();

        if let (Some(batch), Some(sender)) = (remaining, sender.as_ref()) {
            if sender.send(Dispatch::batch(batch)).is_err() {
                error!("Bulk dispatcher stopped before the final batch");
            }
        }
        drop(sender);

        let pipeline = Arc::clone(&self.pipeline);
        let drained = async move {
            if let Some(scheduler) = scheduler {
                scheduler.stop().await;
            }
            if let Some(dispatcher) = dispatcher {
                let _ = dispatcher.await;
            }
            pipeline.wait_idle().await;
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => {
                info!("Bulk processor shut down");
                ShutdownStatus::Complete
            }
            Err(_) => {
                let in_flight = self.pipeline.in_flight();
                warn!(
                    in_flight = in_flight,
                    timeout_ms = timeout.as_millis() as u64,
                    "Bulk processor shutdown timed out"
                );
                ShutdownStatus::Incomplete { in_flight }
            }
        }
    }

    /// Number of buffered mutations.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true once shutdown began.
    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }
}

fn send(
    sender: Option<&mpsc::UnboundedSender<Dispatch>>,
    dispatch: Dispatch,
) -> Result<(), ProcessorError> {
    sender
        .ok_or(ProcessorError::Closed)?
        .send(dispatch)
        .map_err(|_| ProcessorError::DispatcherGone)
}

async fn dispatch_loop(
    mut receiver: mpsc::UnboundedReceiver<Dispatch>,
    pipeline: Arc<BulkPipeline>,
) {
    while let Some(dispatch) = receiver.recv().await {
        if let Some(batch) = dispatch.batch {
            if let Err(e) = pipeline.submit(batch).await {
                error!(error = %e, "Failed to submit bulk batch");
            }
        }
        if let Some(accepted) = dispatch.accepted {
            let _ = accepted.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryCluster;
    use crate::error::IndexerError;
    use serde_json::json;

    fn record(n: usize) -> MutationRecord {
        MutationRecord::index_doc("idx", Some(n.to_string()), json!({"n": n}).into())
    }

    fn processor(cluster: &Arc<InMemoryCluster>, config: BulkConfig) -> BulkProcessor {
        let pipeline = Arc::new(BulkPipeline::new(cluster.clone(), &config));
        BulkProcessor::start(pipeline, &config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drains_buffer() {
        let cluster = Arc::new(InMemoryCluster::new());
        let processor = processor(&cluster, BulkConfig::default());

        processor.enqueue(record(1)).unwrap();
        processor.enqueue(record(2)).unwrap();
        assert_eq!(processor.pending(), 2);

        processor.flush().await.unwrap();
        assert_eq!(processor.pending(), 0);

        assert!(processor.shutdown(Duration::from_secs(5)).await.is_complete());
        assert_eq!(cluster.document_count("idx"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown_is_refused() {
        let cluster = Arc::new(InMemoryCluster::new());
        let processor = processor(&cluster, BulkConfig::default());

        processor.enqueue(record(1)).unwrap();
        assert!(processor.shutdown(Duration::from_secs(5)).await.is_complete());
        assert_eq!(cluster.document_count("idx"), 1);

        let err = processor.enqueue(record(2)).unwrap_err();
        assert!(matches!(
            err,
            IndexerError::Processor(ProcessorError::Closed)
        ));
        assert!(processor.flush().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_rejects_invalid_record() {
        let cluster = Arc::new(InMemoryCluster::new());
        let processor = processor(&cluster, BulkConfig::default());

        let record = MutationRecord {
            index: "idx".to_string(),
            id: None,
            mutation: crate::types::Mutation::Delete,
        };
        assert!(matches!(
            processor.enqueue(record),
            Err(IndexerError::InvalidRequest { .. })
        ));
        assert_eq!(processor.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_with_slow_cluster() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.set_bulk_latency(Duration::from_secs(60));
        let processor = processor(&cluster, BulkConfig::default());

        processor.enqueue(record(1)).unwrap();
        let status = processor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(status, ShutdownStatus::Incomplete { in_flight: 1 });
    }
}
