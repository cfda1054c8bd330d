//! Publisher Loop
//!
//! Drains the record buffer one record at a time and hands each record to an
//! [`AsyncConnector`] under the topic rendered from the template.
//!
//! ## Retry Behaviour
//!
//! A transient failure retries the **same** record after an exponential
//! backoff; the record keeps its place, nothing is re-queued:
//!
//! ```text
//! attempt 1 ──✗── 200ms ── attempt 2 ──✗── 400ms ── attempt 3 ──✓
//! ```
//!
//! Once `max_attempts` is reached the record is dropped and counted. A fatal
//! failure ends the loop with the error.
//!
//! ## Outages
//!
//! While the buffer is open the loop waits for the connector to report a
//! live connection before each attempt, so an outage is absorbed by the
//! buffer instead of burning retry budgets. After the buffer is closed the
//! loop no longer waits: it drains what is left with the retry ceiling as
//! the only bound, then returns.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use ruuvi_mqtt_core::{EnrichedRecord, PipelineStats, RecordBuffer, TopicTemplate};

use crate::{AsyncConnector, ConnectorError};

/// Bounded exponential backoff for transient publish failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Publish attempts per record, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay after the `attempt`-th failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the broker
    Published,
    /// Given up on after the retry ceiling
    Dropped,
}

/// Forwards buffered records to a connector
pub struct Publisher<C> {
    connector: C,
    topic: TopicTemplate,
    retry: RetryPolicy,
    stats: Arc<PipelineStats>,
}

impl<C: AsyncConnector> Publisher<C> {
    pub fn new(connector: C, topic: TopicTemplate, retry: RetryPolicy, stats: Arc<PipelineStats>) -> Self {
        Self {
            connector,
            topic,
            retry,
            stats,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    pub fn into_connector(self) -> C {
        self.connector
    }

    /// Publish records from `buffer` until it is closed and drained
    ///
    /// Returns early only on a fatal connector error.
    pub async fn run(&mut self, buffer: &RecordBuffer<EnrichedRecord>) -> Result<(), ConnectorError> {
        info!("Publisher loop starting");

        loop {
            self.wait_for_link(buffer).await?;
            let Some(record) = buffer.take().await else {
                break;
            };
            self.deliver(&record, Some(buffer)).await?;
        }

        info!("Record buffer drained, publisher loop stopping");
        Ok(())
    }

    /// Publish a single record with retries, without waiting for a connection
    pub async fn publish_record(&mut self, record: &EnrichedRecord) -> Result<Delivery, ConnectorError> {
        self.deliver(record, None).await
    }

    /// Wait for the connector unless the buffer is already closed
    async fn wait_for_link(&mut self, buffer: &RecordBuffer<EnrichedRecord>) -> Result<(), ConnectorError> {
        if buffer.is_closed() || self.connector.is_connected() {
            return Ok(());
        }

        info!("Waiting for broker connection, {} records buffered", buffer.len());
        tokio::select! {
            result = self.connector.wait_connected() => result,
            _ = buffer.closed() => Ok(()),
        }
    }

    async fn deliver(
        &mut self,
        record: &EnrichedRecord,
        buffer: Option<&RecordBuffer<EnrichedRecord>>,
    ) -> Result<Delivery, ConnectorError> {
        let topic = self.topic.render(&record.device(), record.name());
        let payload = match record.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize record for {}: {}", topic, e);
                self.stats.record_publish_drop();
                return Ok(Delivery::Dropped);
            }
        };

        let max_attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            if let Some(buffer) = buffer {
                self.wait_for_link(buffer).await?;
            }
            attempt += 1;

            match self.connector.publish(&topic, &payload).await {
                Ok(()) => {
                    debug!("Published {} bytes to {}", payload.len(), topic);
                    self.stats.record_published();
                    return Ok(Delivery::Published);
                }
                Err(e) if e.is_fatal() => {
                    error!("Publishing to {} failed permanently: {}", topic, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!("Dropping record for {} after {} attempts: {}", topic, attempt, e);
                    self.stats.record_publish_drop();
                    return Ok(Delivery::Dropped);
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Publish to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        topic, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|a| policy.backoff(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200, 5000, 5000]);
    }

    #[test]
    fn backoff_saturates_for_large_attempts() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
    }
}
