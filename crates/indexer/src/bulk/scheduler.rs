//! Time-based flushing.
//!
//! The scheduler sleeps until the buffer's next due instant (last flush plus
//! the flush interval). If mutations are pending by then it drains them and
//! hands the batch to the dispatcher; if the buffer is empty it checks again
//! one interval later.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::bulk::buffer::{DueCheck, WriteBuffer};
use crate::bulk::processor::Dispatch;

/// Handle to the background flush task.
#[derive(Debug)]
pub(crate) struct FlushScheduler {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Starts the flush task.
    pub(crate) fn spawn(
        buffer: Arc<WriteBuffer>,
        interval: Duration,
        dispatch: mpsc::UnboundedSender<Dispatch>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(buffer, interval, dispatch, stop_rx));
        Self { stop, handle }
    }

    /// Stops the task and waits for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

async fn run(
    buffer: Arc<WriteBuffer>,
    interval: Duration,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    mut stop: watch::Receiver<bool>,
) {
    let mut next_check = buffer.last_flush() + interval;

    loop {
        tokio::select! {
            _ = sleep_until(next_check) => {}
            // Also fires when the processor was dropped.
            _ = stop.changed() => break,
        }

        next_check = match buffer.drain_if_due(interval) {
            DueCheck::Drained(batch) => {
                debug!(actions = batch.len(), "Flush interval elapsed, draining buffer");
                if dispatch.send(Dispatch::batch(batch)).is_err() {
                    break;
                }
                Instant::now() + interval
            }
            DueCheck::Empty => Instant::now() + interval,
            DueCheck::NotDue(due) => due,
        };
    }
}
