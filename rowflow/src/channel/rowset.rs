use super::ChannelId;
use crate::cancellation::CancellationToken;
use crate::core::{Row, RowShape};
use crate::errors::{ChannelError, SchemaError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Result of a timed pop.
#[derive(Debug, Clone, PartialEq)]
pub enum PopOutcome {
    /// A row was available.
    Row(Row),
    /// Nothing arrived before the timeout; the producer is still active.
    Empty,
    /// The buffer is empty and the producer is done.
    Done,
}

/// Point-in-time counters of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Channel identity.
    pub id: ChannelId,
    /// Maximum buffered rows.
    pub capacity: usize,
    /// Rows currently buffered.
    pub buffered: usize,
    /// Rows accepted since creation.
    pub pushed: u64,
    /// Rows removed since creation.
    pub popped: u64,
    /// Whether the producer has closed its endpoint.
    pub producer_done: bool,
}

#[derive(Debug, Default)]
struct ChannelState {
    buffer: VecDeque<Row>,
    producer_done: bool,
    consumer_gone: bool,
}

/// A bounded FIFO of rows between one producer and one consumer.
///
/// `push` blocks while the buffer is full, `pop` blocks while it is empty and
/// the producer is still active. Neither condition is an error. Every wait
/// re-checks the run-wide cancellation flag at the poll interval, and
/// [`Channel::wake_all`] interrupts waits immediately.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    capacity: NonZeroUsize,
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
    cancel: Arc<CancellationToken>,
    poll_interval: Duration,
    shape: OnceLock<Arc<RowShape>>,
    pushed: AtomicU64,
    popped: AtomicU64,
}

impl Channel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new(
        id: ChannelId,
        capacity: NonZeroUsize,
        cancel: Arc<CancellationToken>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            capacity,
            state: Mutex::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity.get().min(1024)),
                ..ChannelState::default()
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            cancel,
            poll_interval,
            shape: OnceLock::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Channel identity.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Maximum number of buffered rows.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Rows currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns true if no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once the producer is done and every row was consumed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.producer_done && state.buffer.is_empty()
    }

    /// Returns true once the producer has closed its endpoint.
    #[must_use]
    pub fn is_producer_done(&self) -> bool {
        self.state.lock().producer_done
    }

    /// The shape frozen on this channel, if a row has been announced.
    #[must_use]
    pub fn shape(&self) -> Option<Arc<RowShape>> {
        self.shape.get().cloned()
    }

    /// Freezes the row shape carried by this channel.
    ///
    /// The first call wins. Later calls succeed only with a compatible shape.
    pub fn freeze_shape(&self, shape: &Arc<RowShape>) -> Result<(), ChannelError> {
        let frozen = self.shape.get_or_init(|| Arc::clone(shape));
        if Arc::ptr_eq(frozen, shape) || frozen.is_compatible(shape) {
            Ok(())
        } else {
            Err(SchemaError::incompatible(frozen, shape).into())
        }
    }

    /// Appends a row, blocking while the buffer is full.
    pub fn push(&self, row: Row) -> Result<(), ChannelError> {
        if let Some(shape) = self.shape.get() {
            if row.len() != shape.len() {
                return Err(SchemaError::arity(shape.len(), row.len()).into());
            }
        }

        let mut state = self.state.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            if state.consumer_gone {
                return Err(ChannelError::ConsumerGone(self.id.clone()));
            }
            if state.producer_done {
                return Err(ChannelError::ProducerClosed(self.id.clone()));
            }
            if state.buffer.len() < self.capacity.get() {
                state.buffer.push_back(row);
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait_for(&mut state, self.poll_interval);
        }
    }

    /// Removes the oldest row, blocking while the buffer is empty.
    ///
    /// Returns `Ok(None)` only when the buffer is empty and the producer is
    /// done.
    pub fn pop(&self) -> Result<Option<Row>, ChannelError> {
        let mut state = self.state.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            if let Some(row) = state.buffer.pop_front() {
                self.popped.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Ok(Some(row));
            }
            if state.producer_done {
                return Ok(None);
            }
            self.not_empty.wait_for(&mut state, self.poll_interval);
        }
    }

    /// Removes the oldest row, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<PopOutcome, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            if let Some(row) = state.buffer.pop_front() {
                self.popped.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Ok(PopOutcome::Row(row));
            }
            if state.producer_done {
                return Ok(PopOutcome::Done);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(PopOutcome::Empty);
            }
            let wait = (deadline - now).min(self.poll_interval);
            self.not_empty.wait_for(&mut state, wait);
        }
    }

    /// Removes the oldest row without blocking.
    pub fn try_pop(&self) -> Result<PopOutcome, ChannelError> {
        self.pop_timeout(Duration::ZERO)
    }

    /// Marks the producer side done. Idempotent.
    pub fn close_producer(&self) {
        let mut state = self.state.lock();
        state.producer_done = true;
        self.not_empty.notify_all();
    }

    /// Tears down the consumer side. Later pushes fail with `ConsumerGone`.
    pub fn close_consumer(&self) {
        let mut state = self.state.lock();
        state.consumer_gone = true;
        state.buffer.clear();
        self.not_full.notify_all();
    }

    /// Wakes every blocked thread so it re-checks cancellation.
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Monotonic count of accepted rows.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Monotonic count of removed rows.
    #[must_use]
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    /// Snapshot of the channel counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        let state = self.state.lock();
        ChannelStats {
            id: self.id.clone(),
            capacity: self.capacity.get(),
            buffered: state.buffer.len(),
            pushed: self.pushed(),
            popped: self.popped(),
            producer_done: state.producer_done,
        }
    }
}
