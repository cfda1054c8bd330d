//! Process-wide pipeline counters
//!
//! One [`PipelineStats`] is created at startup and shared (behind an `Arc`)
//! by the ingestion loop, the record buffer and the publisher loop. All
//! counters are atomics, so neither loop ever waits on the other to count.
//!
//! Lost records are never surfaced as errors at runtime; these counters and
//! the log are the only place they show up.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared by both pipeline loops
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    filtered: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    enqueued: AtomicU64,
    overflow_drops: AtomicU64,
    publish_drops: AtomicU64,
    published: AtomicU64,
    enrichment_warnings: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_received, received);
    counter!(record_filtered, filtered);
    counter!(record_duplicate, duplicates);
    counter!(record_rejected, rejected);
    counter!(record_enqueued, enqueued);
    counter!(record_overflow, overflow_drops);
    counter!(record_publish_drop, publish_drops);
    counter!(record_published, published);
    counter!(record_enrichment_warning, enrichment_warnings);

    /// Records lost after acceptance: buffer overflow plus publish failures
    pub fn dropped(&self) -> u64 {
        self.overflow_drops.load(Ordering::Relaxed) + self.publish_drops.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            publish_drops: self.publish_drops.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            enrichment_warnings: self.enrichment_warnings.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Measurements read from the input
    pub received: u64,
    /// Discarded by the MAC name filter
    pub filtered: u64,
    /// Discarded as repeated sequence numbers
    pub duplicates: u64,
    /// Discarded as implausible
    pub rejected: u64,
    /// Accepted into the record buffer
    pub enqueued: u64,
    /// Dropped because the buffer was full
    pub overflow_drops: u64,
    /// Dropped after exhausting publish retries
    pub publish_drops: u64,
    /// Acknowledged by the broker
    pub published: u64,
    /// Records published without a derived value
    pub enrichment_warnings: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.overflow_drops + self.publish_drops
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} filtered={} duplicates={} rejected={} enqueued={} published={} dropped={} (overflow={}, publish={}) enrichment_warnings={}",
            self.received,
            self.filtered,
            self.duplicates,
            self.rejected,
            self.enqueued,
            self.published,
            self.dropped(),
            self.overflow_drops,
            self.publish_drops,
            self.enrichment_warnings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drops_combine_overflow_and_publish_failures() {
        let stats = PipelineStats::new();
        stats.record_overflow();
        stats.record_overflow();
        stats.record_publish_drop();
        stats.record_published();

        assert_eq!(stats.dropped(), 3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.overflow_drops, 2);
        assert_eq!(snapshot.publish_drops, 1);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.dropped(), 3);
    }

    #[test]
    fn counts_from_many_threads() {
        let stats = Arc::new(PipelineStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.snapshot().received, 4000);
    }
}
