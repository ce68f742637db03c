//! In-memory durable store, used in tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::{BanditError, Result};
use crate::policy::ParamState;

use super::{DurableParamStore, StateKey, VersionedState};

/// HashMap-backed [`DurableParamStore`] with real CAS semantics.
#[derive(Default)]
pub struct InMemoryParamStore {
    entries: RwLock<HashMap<StateKey, VersionedState>>,
}

impl InMemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableParamStore for InMemoryParamStore {
    async fn load(&self, key: &StateKey) -> Result<Option<VersionedState>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(
        &self,
        key: &StateKey,
        state: ParamState,
        expected_version: u64,
    ) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let actual = entries.get(key).map(|v| v.version).unwrap_or(0);
        if actual != expected_version {
            return Err(BanditError::StaleWrite {
                key: key.to_string(),
                expected: expected_version,
                actual,
            });
        }
        let version = expected_version + 1;
        entries.insert(key.clone(), VersionedState { state, version });
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AlgorithmFamily, ParamState, PolicyInit};

    fn key() -> StateKey {
        StateKey::new("acme", "pool-1", AlgorithmFamily::BetaTs)
    }

    fn state() -> ParamState {
        ParamState::init(AlgorithmFamily::BetaTs, 2, &PolicyInit::default()).unwrap()
    }

    #[tokio::test]
    async fn create_then_load() {
        let store = InMemoryParamStore::new();
        assert!(store.load(&key()).await.unwrap().is_none());
        let v = store.store(&key(), state(), 0).await.unwrap();
        assert_eq!(v, 1);
        let loaded = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn create_twice_is_stale() {
        let store = InMemoryParamStore::new();
        store.store(&key(), state(), 0).await.unwrap();
        let err = store.store(&key(), state(), 0).await.unwrap_err();
        assert!(matches!(
            err,
            BanditError::StaleWrite {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cas_chain_increments_version() {
        let store = InMemoryParamStore::new();
        let mut version = store.store(&key(), state(), 0).await.unwrap();
        for expected in 1..5 {
            assert_eq!(version, expected);
            version = store.store(&key(), state(), version).await.unwrap();
        }
    }

    #[tokio::test]
    async fn racing_writers_only_one_wins() {
        let store = std::sync::Arc::new(InMemoryParamStore::new());
        store.store(&key(), state(), 0).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.store(&key(), state(), 1).await
            }));
        }
        let mut wins = 0;
        let mut stale = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(2) => wins += 1,
                Err(BanditError::StaleWrite { .. }) => stale += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(stale, 7);
        assert_eq!(store.load(&key()).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn write_to_missing_key_with_nonzero_expectation_is_stale() {
        let store = InMemoryParamStore::new();
        let err = store.store(&key(), state(), 3).await.unwrap_err();
        assert!(matches!(
            err,
            BanditError::StaleWrite {
                expected: 3,
                actual: 0,
                ..
            }
        ));
    }
}
