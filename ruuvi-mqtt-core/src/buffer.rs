//! Bounded Record Buffer Between Ingestion and Publishing
//!
//! ## Overview
//!
//! Tags broadcast roughly once per second each, whether or not the broker is
//! reachable. This module provides the bounded FIFO that absorbs readings
//! while the outbound link is slow or down, decoupling the two loops of the
//! gateway:
//!
//! ```text
//! Ingestion loop                     Publisher loop
//!      ↓                                  ↑
//!   offer() ──→ [ A | B | C | ... ] ──→ take()
//!      ↓                                  ↑
//!  never waits                      waits while empty
//! ```
//!
//! ## Overflow Policy
//!
//! The buffer holds at most `capacity` records. When it is full, `offer()`
//! refuses the **newest** record and counts it as dropped:
//!
//! ```text
//! capacity = 2
//! offer(A) → true    [A]
//! offer(B) → true    [A, B]
//! offer(C) → false   [A, B]    dropped = 1
//! take()   → A       [B]
//! take()   → B       []
//! ```
//!
//! Dropping the newest record keeps what was already accepted in order and
//! bounds memory during a long broker outage.
//!
//! ## Closing
//!
//! `close()` marks the end of input. Records already queued can still be
//! taken; once the buffer is closed and empty, `take()` returns `None`
//! instead of waiting, which is how the publisher loop knows to exit.
//!
//! ## Concurrency
//!
//! The queue itself sits behind a short-lived mutex that is never held across
//! an `.await`. Waiting consumers park on a [`Notify`], so `offer()` stays
//! non-blocking for the producer regardless of what the consumer is doing.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ruuvi_mqtt_core::buffer::RecordBuffer;
//! use ruuvi_mqtt_core::stats::PipelineStats;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ruuvi_mqtt_core::ConfigError> {
//! let stats = Arc::new(PipelineStats::new());
//! let buffer = RecordBuffer::new(2, Arc::clone(&stats))?;
//!
//! assert!(buffer.offer("A"));
//! assert!(buffer.offer("B"));
//! assert!(!buffer.offer("C"));
//! buffer.close();
//!
//! assert_eq!(buffer.take().await, Some("A"));
//! assert_eq!(buffer.take().await, Some("B"));
//! assert_eq!(buffer.take().await, None);
//! assert_eq!(stats.dropped(), 1);
//! # Ok(())
//! # }
//! ```

use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify};

use crate::errors::{ConfigError, ConfigResult};
use crate::stats::PipelineStats;

/// Default capacity (records)
pub const DEFAULT_BUFFER_SIZE: usize = 100_000;

/// Buffer statistics
///
/// Track queue health without touching the queue lock
#[derive(Debug, Default)]
pub struct BufferStats {
    /// Total records accepted
    pub accepted: AtomicU64,
    /// Total records taken
    pub taken: AtomicU64,
    /// Maximum queue depth seen
    pub max_depth: AtomicU64,
}

impl BufferStats {
    /// Update max depth if current is higher
    fn update_max_depth(&self, current: u64) {
        self.max_depth.fetch_max(current, Ordering::Relaxed);
    }
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} taken={} max_depth={}",
            self.accepted.load(Ordering::Relaxed),
            self.taken.load(Ordering::Relaxed),
            self.max_depth.load(Ordering::Relaxed),
        )
    }
}

struct BufferState<T> {
    records: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO shared by the ingestion and publisher loops
pub struct RecordBuffer<T> {
    state: Mutex<BufferState<T>>,
    capacity: usize,
    /// Wakes consumers waiting in `take()`
    available: Notify,
    /// Mirrors `state.closed` for `closed()` waiters
    closed_tx: watch::Sender<bool>,
    stats: BufferStats,
    pipeline: Arc<PipelineStats>,
}

impl<T> RecordBuffer<T> {
    /// Create an empty buffer holding at most `capacity` records
    ///
    /// Overflow drops are counted in `pipeline`.
    pub fn new(capacity: usize, pipeline: Arc<PipelineStats>) -> ConfigResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::InvalidBufferSize(capacity));
        }

        let (closed_tx, _) = watch::channel(false);
        Ok(Self {
            state: Mutex::new(BufferState {
                records: VecDeque::new(),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
            closed_tx,
            stats: BufferStats::default(),
            pipeline,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        // A panic elsewhere cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without waiting
    ///
    /// Returns false, dropping `record`, when the buffer is full or closed.
    pub fn offer(&self, record: T) -> bool {
        let depth = {
            let mut state = self.lock();
            if state.closed || state.records.len() >= self.capacity {
                drop(state);
                self.pipeline.record_overflow();
                return false;
            }
            state.records.push_back(record);
            state.records.len()
        };

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.update_max_depth(depth as u64);
        self.pipeline.record_enqueued();
        self.available.notify_one();
        true
    }

    /// Dequeue the oldest record, waiting while the buffer is empty
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub async fn take(&self) -> Option<T> {
        loop {
            // Register interest before checking, so a close() or offer()
            // between the check and the await is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(record) = state.records.pop_front() {
                    drop(state);
                    self.stats.taken.fetch_add(1, Ordering::Relaxed);
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Dequeue the oldest record if there is one
    pub fn try_take(&self) -> Option<T> {
        let record = self.lock().records.pop_front();
        if record.is_some() {
            self.stats.taken.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Stop accepting records and wake all waiting consumers
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.closed_tx.send_replace(true);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until `close()` has been called
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // Only fails if the sender is gone, which cannot happen while `self` lives
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Current number of queued records
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}
