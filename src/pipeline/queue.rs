//! Bounded drop-oldest queue between capture and inference.
//!
//! The producer side keeps its own handle on the receiving end so that a
//! full queue can be made room in by evicting the oldest pending window.
//! Capture therefore never blocks on a slow classifier.

use crate::pipeline::diagnostics::Diagnostics;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Producer half of the pending-window queue.
pub struct PendingWindowQueue<T> {
    tx: Sender<T>,
    evict_rx: Receiver<T>,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
}

/// Outcome of a [`PendingWindowQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting this many older items.
    QueuedAfterEviction(usize),
    /// Dropped: the consumer is gone or the caller stopped waiting.
    Abandoned,
}

impl<T> PendingWindowQueue<T> {
    /// Creates the queue and the consumer receiver.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, diagnostics: Arc<Diagnostics>) -> (Self, Receiver<T>) {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let queue = Self {
            tx,
            evict_rx: rx.clone(),
            capacity,
            diagnostics,
        };
        (queue, rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting for the consumer.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Enqueue without blocking, evicting the oldest item if full.
    ///
    /// The queue never holds more than `capacity` items.
    pub fn push(&self, item: T) -> PushOutcome {
        let mut item = item;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return if evicted == 0 {
                        PushOutcome::Queued
                    } else {
                        PushOutcome::QueuedAfterEviction(evicted)
                    };
                }
                Err(TrySendError::Full(returned)) => {
                    item = returned;
                    // The consumer may have taken one in the meantime; then
                    // there is nothing to evict and the retry succeeds.
                    if self.evict_rx.try_recv().is_ok() {
                        evicted += 1;
                        self.diagnostics.record_queue_overflow();
                        trace!(capacity = self.capacity, "pending queue full, dropped oldest window");
                    }
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Abandoned,
            }
        }
    }

    /// Enqueue, waiting for room instead of evicting.
    ///
    /// Only for non-live sources such as file replay, where waiting loses
    /// no audio. Gives up once `keep_waiting` returns false.
    pub fn push_wait(&self, item: T, keep_waiting: impl Fn() -> bool) -> PushOutcome {
        let mut item = item;
        loop {
            match self.tx.send_timeout(item, Duration::from_millis(50)) {
                Ok(()) => return PushOutcome::Queued,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if !keep_waiting() {
                        return PushOutcome::Abandoned;
                    }
                    item = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return PushOutcome::Abandoned,
            }
        }
    }
}
