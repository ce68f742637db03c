//! Parameter storage: the durable store behind the trainer and the
//! read-path cache in front of it.
//!
//! The durable store is the single source of truth and the only writer
//! surface; every write is a compare-and-swap on a per-key version counter,
//! so a racing writer observes [`BanditError::StaleWrite`] instead of
//! silently clobbering newer state.

mod cache;
mod memory;

pub use cache::ParamCache;
pub use memory::InMemoryParamStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::errors::Result;
use crate::policy::{AlgorithmFamily, ParamState};

/// Addresses one pool's parameter state for one tenant and family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub tenant_id: String,
    pub pool_id: String,
    pub family: AlgorithmFamily,
}

impl StateKey {
    pub fn new(
        tenant_id: impl Into<String>,
        pool_id: impl Into<String>,
        family: AlgorithmFamily,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            pool_id: pool_id.into(),
            family,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.pool_id, self.family)
    }
}

/// Parameter state together with its CAS version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedState {
    pub state: ParamState,
    pub version: u64,
}

/// Durable, versioned parameter storage.
#[async_trait]
pub trait DurableParamStore: Send + Sync {
    /// Fetch the current state and version, or `None` if the key has never
    /// been written.
    async fn load(&self, key: &StateKey) -> Result<Option<VersionedState>>;

    /// Compare-and-swap write. `expected_version == 0` means create-if-absent.
    /// On success returns the new version (`expected_version + 1`); on a
    /// version mismatch returns [`BanditError::StaleWrite`].
    ///
    /// [`BanditError::StaleWrite`]: crate::errors::BanditError::StaleWrite
    async fn store(
        &self,
        key: &StateKey,
        state: ParamState,
        expected_version: u64,
    ) -> Result<u64>;
}

/// Read-through facade combining the cache with the durable store.
///
/// The read path goes through the cache; the trainer bypasses it with
/// [`read_durable`](ParamBackend::read_durable) because it must apply
/// updates to the authoritative version, never a cached snapshot.
pub struct ParamBackend {
    cache: ParamCache,
    store: Arc<dyn DurableParamStore>,
}

impl ParamBackend {
    pub fn new(store: Arc<dyn DurableParamStore>, config: &CacheConfig) -> Self {
        Self {
            cache: ParamCache::new(config),
            store,
        }
    }

    /// Cache-first read used by the selection path.
    pub async fn read(&self, key: &StateKey) -> Result<Option<VersionedState>> {
        self.cache.get(key, self.store.as_ref()).await
    }

    /// Direct read from the durable store, bypassing the cache.
    pub async fn read_durable(&self, key: &StateKey) -> Result<Option<VersionedState>> {
        self.store.load(key).await
    }

    /// CAS write through to the durable store; the cache is refreshed
    /// eagerly on success so the writer's own replica serves the new state
    /// without waiting out the TTL.
    pub async fn write(
        &self,
        key: &StateKey,
        state: ParamState,
        expected_version: u64,
    ) -> Result<u64> {
        let version = self.store.store(key, state.clone(), expected_version).await?;
        self.cache
            .put(key.clone(), VersionedState { state, version })
            .await;
        Ok(version)
    }

    /// Drop any cached entry for `key`.
    pub async fn invalidate(&self, key: &StateKey) {
        self.cache.invalidate(key).await;
    }
}
