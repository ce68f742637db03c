//! The feedback log: an append-only, consumer-acknowledged event stream
//! between the feedback boundary and the trainer.
//!
//! Delivery is at-least-once. Events stay in the log until acknowledged;
//! a consumer that crashes mid-batch calls
//! [`reset_to_committed`](FeedbackLog::reset_to_committed) on restart and
//! receives every unacknowledged event again, in the original append order.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::errors::Result;
use crate::token::TokenClaims;

/// One observed reward, bound to the selection that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Verified claims from the selection token
    pub claims: TokenClaims,
    pub reward: f64,
    pub received_at_ms: i64,
}

impl FeedbackEvent {
    /// Events for the same pool must be applied in append order; this is
    /// the grouping key the trainer batches by.
    pub fn partition_key(&self) -> &str {
        &self.claims.pool_id
    }
}

/// Append-only reward stream with per-offset acknowledgement.
#[async_trait]
pub trait FeedbackLog: Send + Sync {
    /// Append an event; returns its offset. Never blocks the producer.
    async fn append(&self, event: FeedbackEvent) -> Result<u64>;

    /// Deliver up to `max` events past the consumer cursor, waiting up to
    /// `wait` for at least one to arrive. An empty batch after the wait is
    /// a normal idle poll, not an error.
    async fn poll(&self, max: usize, wait: Duration) -> Result<Vec<(u64, FeedbackEvent)>>;

    /// Acknowledge processed offsets; acknowledged events leave the log.
    async fn ack(&self, offsets: &[u64]) -> Result<()>;

    /// Highest acknowledged offset, for observability.
    async fn committed(&self) -> u64;

    /// Rewind the consumer cursor so every unacknowledged event is
    /// delivered again.
    async fn reset_to_committed(&self);
}

struct LogInner {
    /// Unacknowledged events in append order.
    events: VecDeque<(u64, FeedbackEvent)>,
    next_offset: u64,
    /// Delivery cursor: offsets below it have been handed out since the
    /// last reset.
    cursor: u64,
    committed: u64,
}

/// In-process [`FeedbackLog`] with a bounded retention buffer.
pub struct InMemoryFeedbackLog {
    inner: Mutex<LogInner>,
    notify: Notify,
    retention: usize,
}

impl InMemoryFeedbackLog {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::new(),
                next_offset: 1,
                cursor: 1,
                committed: 0,
            }),
            notify: Notify::new(),
            retention,
        }
    }

    async fn collect(&self, max: usize) -> Vec<(u64, FeedbackEvent)> {
        let mut inner = self.inner.lock().await;
        let cursor = inner.cursor;
        let batch: Vec<_> = inner
            .events
            .iter()
            .filter(|(offset, _)| *offset >= cursor)
            .take(max)
            .cloned()
            .collect();
        if let Some((last, _)) = batch.last() {
            inner.cursor = last + 1;
        }
        batch
    }
}

#[async_trait]
impl FeedbackLog for InMemoryFeedbackLog {
    async fn append(&self, event: FeedbackEvent) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        // Retention is the backpressure valve: shed the oldest event rather
        // than block or grow without bound.
        if inner.events.len() >= self.retention {
            if let Some((dropped, _)) = inner.events.pop_front() {
                warn!(offset = dropped, "feedback log full, dropping oldest unconsumed event");
            }
        }
        let offset = inner.next_offset;
        inner.next_offset += 1;
        inner.events.push_back((offset, event));
        drop(inner);
        self.notify.notify_waiters();
        Ok(offset)
    }

    async fn poll(&self, max: usize, wait: Duration) -> Result<Vec<(u64, FeedbackEvent)>> {
        let notified = self.notify.notified();
        let batch = self.collect(max).await;
        if !batch.is_empty() {
            return Ok(batch);
        }
        let _ = tokio::time::timeout(wait, notified).await;
        Ok(self.collect(max).await)
    }

    async fn ack(&self, offsets: &[u64]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.events.retain(|(offset, _)| !offsets.contains(offset));
        if let Some(&highest) = offsets.iter().max() {
            inner.committed = inner.committed.max(highest);
        }
        Ok(())
    }

    async fn committed(&self) -> u64 {
        self.inner.lock().await.committed
    }

    async fn reset_to_committed(&self) {
        let mut inner = self.inner.lock().await;
        inner.cursor = inner
            .events
            .front()
            .map(|(offset, _)| *offset)
            .unwrap_or(inner.next_offset);
    }
}
