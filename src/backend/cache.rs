//! Read-path parameter cache.
//!
//! Selection latency must not depend on the durable store, so reads are
//! served from a TTL cache. A miss triggers a single-flight fetch: one
//! caller refreshes while the rest wait on the same gate, then re-check the
//! cache. If the store errors or times out, a stale entry within the stale
//! budget is served instead of failing the selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::errors::{BanditError, Result};

use super::{DurableParamStore, StateKey, VersionedState};

struct CacheEntry {
    state: VersionedState,
    fetched_at: Instant,
}

pub struct ParamCache {
    ttl: Duration,
    stale_budget: Duration,
    max_entries: usize,
    fetch_timeout: Duration,
    entries: RwLock<HashMap<StateKey, CacheEntry>>,
    inflight: Mutex<HashMap<StateKey, Arc<Mutex<()>>>>,
}

impl ParamCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            stale_budget: config.stale_budget,
            max_entries: config.max_entries,
            fetch_timeout: config.fetch_timeout,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Cached read with single-flight refresh and serve-stale fallback.
    pub async fn get(
        &self,
        key: &StateKey,
        store: &dyn DurableParamStore,
    ) -> Result<Option<VersionedState>> {
        if let Some(hit) = self.lookup(key, false).await {
            return Ok(Some(hit));
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // Another caller may have refreshed while we waited on the gate.
        if let Some(hit) = self.lookup(key, false).await {
            self.release_gate(key).await;
            return Ok(Some(hit));
        }

        let fetched = match tokio::time::timeout(self.fetch_timeout, store.load(key)).await {
            Ok(result) => result,
            Err(_) => Err(BanditError::backend(format!(
                "parameter fetch for {key} exceeded {:?}",
                self.fetch_timeout
            ))),
        };
        let result = match fetched {
            Ok(Some(state)) => {
                self.put(key.clone(), state.clone()).await;
                Ok(Some(state))
            }
            Ok(None) => Ok(None),
            Err(e) => match self.lookup(key, true).await {
                Some(stale) => {
                    warn!(%key, error = %e, "durable store unreachable, serving stale state");
                    Ok(Some(stale))
                }
                None => Err(e),
            },
        };
        self.release_gate(key).await;
        result
    }

    /// Insert or refresh an entry, evicting the oldest past capacity.
    pub async fn put(&self, key: StateKey, state: VersionedState) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                state,
                fetched_at: Instant::now(),
            },
        );
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(key = %k, "evicting oldest cache entry");
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub async fn invalidate(&self, key: &StateKey) {
        self.entries.write().await.remove(key);
    }

    async fn lookup(&self, key: &StateKey, allow_stale: bool) -> Option<VersionedState> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        let limit = if allow_stale {
            self.ttl + self.stale_budget
        } else {
            self.ttl
        };
        (entry.fetched_at.elapsed() <= limit).then(|| entry.state.clone())
    }

    async fn release_gate(&self, key: &StateKey) {
        self.inflight.lock().await.remove(key);
    }
}
