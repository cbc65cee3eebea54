//! The write buffer shared by producers, the flush scheduler and explicit
//! flushes.
//!
//! All state sits behind one mutex. Draining swaps the pending list out, so
//! a record is either in the buffer or in exactly one drained batch.

use std::mem;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ProcessorError;
use crate::types::MutationRecord;

/// Pending mutations awaiting a flush.
#[derive(Debug)]
pub struct WriteBuffer {
    max_count: usize,
    max_bytes: usize,
    state: Mutex<BufferState>,
}

#[derive(Debug)]
struct BufferState {
    pending: Vec<MutationRecord>,
    approximate_bytes: usize,
    last_flush: Instant,
    closed: bool,
}

impl BufferState {
    fn take(&mut self) -> Vec<MutationRecord> {
        self.approximate_bytes = 0;
        self.last_flush = Instant::now();
        mem::take(&mut self.pending)
    }
}

/// Result of asking the buffer for a time-based flush.
#[derive(Debug)]
pub enum DueCheck {
    /// The interval elapsed and the buffer held mutations.
    Drained(Vec<MutationRecord>),
    /// The interval elapsed but nothing was pending.
    Empty,
    /// The buffer was flushed recently; the next flush is due at this
    /// instant.
    NotDue(Instant),
}

impl WriteBuffer {
    /// Creates a buffer that flushes at `max_count` mutations or
    /// `max_bytes` bytes, whichever comes first.
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            max_count,
            max_bytes,
            state: Mutex::new(BufferState {
                pending: Vec::new(),
                approximate_bytes: 0,
                last_flush: Instant::now(),
                closed: false,
            }),
        }
    }

    /// Appends a mutation.
    ///
    /// Returns the drained batch when this append reached the count or byte
    /// limit. Fails once the buffer is closed.
    pub fn push(
        &self,
        record: MutationRecord,
    ) -> Result<Option<Vec<MutationRecord>>, ProcessorError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ProcessorError::Closed);
        }

        state.approximate_bytes += record.approximate_size();
        state.pending.push(record);

        if state.pending.len() >= self.max_count || state.approximate_bytes >= self.max_bytes {
            Ok(Some(state.take()))
        } else {
            Ok(None)
        }
    }

    /// Drains everything pending, `None` if nothing was.
    pub fn drain(&self) -> Option<Vec<MutationRecord>> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            state.last_flush = Instant::now();
            None
        } else {
            Some(state.take())
        }
    }

    /// Drains if `interval` has elapsed since the last flush.
    pub fn drain_if_due(&self, interval: Duration) -> DueCheck {
        let mut state = self.state.lock();
        let due = state.last_flush + interval;
        if Instant::now() < due {
            DueCheck::NotDue(due)
        } else if state.pending.is_empty() {
            DueCheck::Empty
        } else {
            DueCheck::Drained(state.take())
        }
    }

    /// Refuses further pushes and drains what is left.
    pub fn close(&self) -> Option<Vec<MutationRecord>> {
        let mut state = self.state.lock();
        state.closed = true;
        if state.pending.is_empty() {
            None
        } else {
            Some(state.take())
        }
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Estimated size of the pending mutations.
    pub fn approximate_bytes(&self) -> usize {
        self.state.lock().approximate_bytes
    }

    /// Instant of the last drain.
    pub fn last_flush(&self) -> Instant {
        self.state.lock().last_flush
    }
}
