//! The trainer: sole writer of parameter state.
//!
//! Events are pulled from the feedback log, grouped per pool, applied to a
//! fresh durable read of that pool's state, and written back with one CAS
//! per pool per batch. Offsets are acknowledged only after the write lands,
//! so a crash at any point replays the unacknowledged tail; duplicates from
//! that replay are absorbed by a bounded nonce window.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::apply_feedback;
use crate::backend::{ParamBackend, StateKey};
use crate::config::TrainerConfig;
use crate::errors::{BanditError, Result};
use crate::feedback::{FeedbackEvent, FeedbackLog};

/// Monotonic trainer counters, shared with the handle.
#[derive(Default)]
pub struct TrainerStats {
    polled: AtomicU64,
    applied: AtomicU64,
    deduped: AtomicU64,
    skipped_malformed: AtomicU64,
    batches: AtomicU64,
    write_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub polled: u64,
    pub applied: u64,
    pub deduped: u64,
    pub skipped_malformed: u64,
    pub batches: u64,
    pub write_retries: u64,
}

impl TrainerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polled: self.polled.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            skipped_malformed: self.skipped_malformed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
        }
    }
}

/// Control surface for a running trainer.
pub struct TrainerHandle {
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<TrainerStats>,
}

impl TrainerHandle {
    /// Request a graceful stop; pending events are flushed first.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct Trainer {
    backend: Arc<ParamBackend>,
    log: Arc<dyn FeedbackLog>,
    config: TrainerConfig,
    shutdown: watch::Receiver<bool>,
    stats: Arc<TrainerStats>,
    /// Nonces applied within the dedup window, with their apply time.
    dedup: HashMap<Uuid, Instant>,
}

impl Trainer {
    pub fn new(
        backend: Arc<ParamBackend>,
        log: Arc<dyn FeedbackLog>,
        config: TrainerConfig,
    ) -> (Self, TrainerHandle) {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let stats = Arc::new(TrainerStats::default());
        let trainer = Trainer {
            backend,
            log,
            config,
            shutdown,
            stats: stats.clone(),
            dedup: HashMap::new(),
        };
        (trainer, TrainerHandle { shutdown_tx, stats })
    }

    /// Consume the log until shutdown. Run this on its own task.
    pub async fn run(mut self) {
        // Anything delivered but unacknowledged by a previous incarnation
        // comes back first.
        self.log.reset_to_committed().await;
        info!(batch_size = self.config.batch_size, "trainer started");

        let mut pending: Vec<(u64, FeedbackEvent)> = Vec::new();
        let mut deadline = Instant::now() + self.config.flush_interval;
        let mut stopping = false;

        while !stopping {
            let want = self.config.batch_size.saturating_sub(pending.len()).max(1);
            tokio::select! {
                _ = self.shutdown.changed() => {
                    stopping = true;
                }
                polled = self.log.poll(want, self.config.poll_block) => match polled {
                    Ok(batch) => pending.extend(batch),
                    Err(e) => {
                        warn!(error = %e, "feedback poll failed");
                        tokio::time::sleep(self.config.backoff_initial).await;
                    }
                },
            }

            let due = Instant::now() >= deadline;
            if pending.len() >= self.config.batch_size || (due && !pending.is_empty()) {
                self.flush(&mut pending).await;
            }
            if due {
                deadline = Instant::now() + self.config.flush_interval;
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending).await;
        }
        info!("trainer stopped");
    }

    async fn flush(&mut self, pending: &mut Vec<(u64, FeedbackEvent)>) {
        let batch = std::mem::take(pending);
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.polled.fetch_add(batch.len() as u64, Ordering::Relaxed);

        // Group per state key, preserving per-pool append order.
        let mut groups: Vec<(StateKey, Vec<(u64, FeedbackEvent)>)> = Vec::new();
        for (offset, event) in batch {
            let key = StateKey::new(
                event.claims.tenant_id.clone(),
                event.claims.pool_id.clone(),
                event.claims.family,
            );
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push((offset, event)),
                None => groups.push((key, vec![(offset, event)])),
            }
        }

        let mut to_ack = Vec::new();
        for (key, events) in groups {
            match self.train_group(&key, &events).await {
                Ok(()) => to_ack.extend(events.iter().map(|(offset, _)| *offset)),
                Err(e) => {
                    warn!(%key, error = %e, count = events.len(),
                        "pool batch failed, leaving events for redelivery");
                }
            }
        }
        if !to_ack.is_empty() {
            if let Err(e) = self.log.ack(&to_ack).await {
                warn!(error = %e, "ack failed, events will be redelivered");
            }
        }
        self.prune_dedup();
    }

    /// Apply one pool's events and persist the result with a single CAS.
    ///
    /// `Ok` means the events are finished (applied, deduplicated, or
    /// unsalvageable) and may be acknowledged; `Err` means they must stay in
    /// the log.
    async fn train_group(&mut self, key: &StateKey, events: &[(u64, FeedbackEvent)]) -> Result<()> {
        let mut attempt: u32 = 0;
        let mut backoff = self.config.backoff_initial;

        loop {
            let versioned = match self.backend.read_durable(key).await {
                Ok(v) => v,
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.backoff_max);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(mut versioned) = versioned else {
                // The experiment was never initialized (or was torn down);
                // these events can never apply.
                warn!(%key, count = events.len(), "no parameter state for events, discarding");
                return Ok(());
            };

            let mut deduped = 0u64;
            let mut malformed = 0u64;
            let mut applied_nonces = Vec::new();
            // Duplicates can sit next to each other in one batch (caller
            // retries land within one flush interval), so the check covers
            // nonces applied in this pass as well as the persisted window.
            let mut seen: HashSet<Uuid> = HashSet::new();
            for (offset, event) in events {
                let nonce = event.claims.nonce;
                if self.dedup_hit(&nonce) || seen.contains(&nonce) {
                    deduped += 1;
                    continue;
                }
                match apply_feedback(&mut versioned.state, &event.claims, event.reward) {
                    Ok(()) => {
                        seen.insert(nonce);
                        applied_nonces.push(nonce);
                    }
                    Err(e) => {
                        malformed += 1;
                        warn!(%key, offset, error = %e, "unapplicable event, discarding");
                    }
                }
            }

            if applied_nonces.is_empty() {
                self.stats.deduped.fetch_add(deduped, Ordering::Relaxed);
                self.stats
                    .skipped_malformed
                    .fetch_add(malformed, Ordering::Relaxed);
                return Ok(());
            }

            match self
                .backend
                .write(key, versioned.state, versioned.version)
                .await
            {
                Ok(new_version) => {
                    let now = Instant::now();
                    let applied = applied_nonces.len() as u64;
                    for nonce in applied_nonces {
                        self.dedup.insert(nonce, now);
                    }
                    self.stats.applied.fetch_add(applied, Ordering::Relaxed);
                    self.stats.deduped.fetch_add(deduped, Ordering::Relaxed);
                    self.stats
                        .skipped_malformed
                        .fetch_add(malformed, Ordering::Relaxed);
                    debug!(%key, applied, new_version, "pool batch committed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_attempts => {
                    if matches!(e, BanditError::StaleWrite { .. }) {
                        debug!(%key, error = %e, "write raced, reapplying from fresh read");
                    } else {
                        warn!(%key, error = %e, "write failed, retrying");
                    }
                    self.stats.write_retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.backoff_max);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A nonce counts as a duplicate only while its entry is inside the
    /// window. Pruning is a memory bound, not the correctness check: an
    /// expired entry that has not been swept yet must not deduplicate.
    fn dedup_hit(&self, nonce: &Uuid) -> bool {
        self.dedup
            .get(nonce)
            .is_some_and(|applied_at| applied_at.elapsed() < self.config.dedup_window)
    }

    fn prune_dedup(&mut self) {
        let window = self.config.dedup_window;
        self.dedup.retain(|_, applied_at| applied_at.elapsed() < window);
    }
}
