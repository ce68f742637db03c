//! Engine configuration.
//!
//! Plain data with serde derives; the surrounding service decides where the
//! values come from (env, file, flags). Defaults match the reference
//! deployment and are safe for tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Selection token signing and expiry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HMAC signing key. Must be shared by every replica that mints or
    /// verifies tokens.
    pub secret: Vec<u8>,
    /// Maximum accepted token age in milliseconds.
    pub max_age_ms: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: b"bandix-dev-secret".to_vec(),
            // 15 minutes
            max_age_ms: 15 * 60 * 1000,
        }
    }
}

/// Read-path cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a cached parameter state is served without a refresh.
    pub ttl: Duration,
    /// Extra window past the TTL during which a stale entry may still be
    /// served if the durable store is unreachable.
    pub stale_budget: Duration,
    /// Upper bound on cached entries; the oldest entry is evicted first.
    pub max_entries: usize,
    /// Bound on a single durable-store fetch from the read path.
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            stale_budget: Duration::from_secs(30),
            max_entries: 10_000,
            fetch_timeout: Duration::from_millis(250),
        }
    }
}

/// Trainer batching and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Maximum events accumulated before a flush.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before a flush.
    pub flush_interval: Duration,
    /// Blocking wait per log poll.
    pub poll_block: Duration,
    /// How long an applied nonce is remembered for deduplication.
    /// Duplicates arriving outside this window are applied again — a
    /// documented availability/memory trade-off, not a bug.
    pub dedup_window: Duration,
    /// Retry attempts per pool-batch before giving up and letting the log
    /// redeliver.
    pub max_attempts: u32,
    /// Initial backoff after a transient write failure; doubles per attempt.
    pub backoff_initial: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            poll_block: Duration::from_millis(100),
            dedup_window: Duration::from_secs(600),
            max_attempts: 5,
            backoff_initial: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub token: TokenConfig,
    pub cache: CacheConfig,
    pub trainer: TrainerConfig,
}
