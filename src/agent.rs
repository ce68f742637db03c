//! The agent: selection, feedback intake, and experiment initialization.
//!
//! Selection is read-only with respect to durable state. The agent reads a
//! parameter snapshot, samples or scores arms, and mints a signed token;
//! rewards arrive later through [`Agent::train`], which only validates and
//! appends to the feedback log. All learning happens in the trainer.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{ParamBackend, StateKey};
use crate::errors::{BanditError, Result};
use crate::feedback::{FeedbackEvent, FeedbackLog};
use crate::policy::ParamState;
use crate::token::{TokenClaims, TokenCodec};
use crate::types::{Arm, Context, ExperimentDescriptor};

/// Result of one selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub arm_index: usize,
    pub arm: Arm,
    /// Signed token the caller must hand back with the reward
    pub token: String,
    /// Parameter state version the decision was made against
    pub state_version: u64,
    /// Unique id of this selection (also the dedup nonce inside the token)
    pub request_id: Uuid,
}

/// Receipt for an accepted reward.
#[derive(Debug, Clone)]
pub struct TrainAck {
    /// Offset assigned by the feedback log
    pub offset: u64,
    pub pool_id: String,
}

/// Outcome of [`Agent::initialize_experiment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Fresh state written at this version
    Created { version: u64 },
    /// State already existed; the existing learning progress is preserved
    AlreadyInitialized,
}

pub struct Agent {
    backend: Arc<ParamBackend>,
    log: Arc<dyn FeedbackLog>,
    codec: TokenCodec,
    rng: Mutex<StdRng>,
}

impl Agent {
    pub fn new(
        backend: Arc<ParamBackend>,
        log: Arc<dyn FeedbackLog>,
        codec: TokenCodec,
    ) -> Self {
        Self::with_seed(backend, log, codec, rand::random())
    }

    /// Deterministic construction: two agents built with the same seed make
    /// identical decisions given identical state and call order.
    pub fn with_seed(
        backend: Arc<ParamBackend>,
        log: Arc<dyn FeedbackLog>,
        codec: TokenCodec,
        seed: u64,
    ) -> Self {
        Self {
            backend,
            log,
            codec,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Create the parameter state for an experiment if it does not exist.
    ///
    /// Losing the create race to another replica is not an error; the
    /// existing state wins and keeps its learning progress.
    pub async fn initialize_experiment(
        &self,
        descriptor: &ExperimentDescriptor,
    ) -> Result<InitOutcome> {
        let state = ParamState::init(descriptor.family, descriptor.pool.len(), &descriptor.init)?;
        let key = self.state_key(descriptor);
        match self.backend.write(&key, state, 0).await {
            Ok(version) => {
                info!(%key, version, "experiment state created");
                Ok(InitOutcome::Created { version })
            }
            Err(BanditError::StaleWrite { .. }) => Ok(InitOutcome::AlreadyInitialized),
            Err(e) => Err(e),
        }
    }

    /// Pick an arm for one request and mint the matching feedback token.
    pub async fn select(
        &self,
        descriptor: &ExperimentDescriptor,
        context: &Context,
    ) -> Result<Selection> {
        let pool = &descriptor.pool;
        if pool.is_empty() {
            return Err(BanditError::PoolEmpty {
                pool_id: pool.id.clone(),
            });
        }

        let key = self.state_key(descriptor);
        let versioned =
            self.backend
                .read(&key)
                .await?
                .ok_or_else(|| BanditError::StateUnavailable {
                    pool_id: pool.id.clone(),
                })?;
        if versioned.state.num_arms() != pool.len() {
            return Err(BanditError::contract(format!(
                "pool {} has {} arms but stored state has {}",
                pool.id,
                pool.len(),
                versioned.state.num_arms()
            )));
        }

        let arm_index = {
            let mut rng = self.rng.lock().await;
            versioned.state.select(context, &mut *rng)?
        };

        let request_id = Uuid::new_v4();
        let claims = TokenClaims {
            tenant_id: descriptor.tenant_id.clone(),
            experiment_id: descriptor.experiment_id.clone(),
            pool_id: pool.id.clone(),
            arm_index,
            family: descriptor.family,
            state_version: versioned.version,
            // Only the contextual families replay the context at training
            // time; keep the token small for everyone else.
            context: if descriptor.family.is_contextual() {
                context.vector.clone()
            } else {
                Vec::new()
            },
            issued_at_ms: Utc::now().timestamp_millis(),
            nonce: request_id,
        };
        let token = self.codec.encode(&claims)?;
        debug!(%key, arm_index, version = versioned.version, "selection made");

        Ok(Selection {
            arm_index,
            arm: pool.arm(arm_index)?.clone(),
            token,
            state_version: versioned.version,
            request_id,
        })
    }

    /// Validate a reward against its token and enqueue it for training.
    ///
    /// A rejected token or reward produces no event; at-least-once delivery
    /// starts only after this method returns `Ok`.
    pub async fn train(&self, token: &str, reward: f64) -> Result<TrainAck> {
        let claims = self.codec.decode(token)?;
        claims.family.reward_kind().validate(claims.family, reward)?;

        let pool_id = claims.pool_id.clone();
        let event = FeedbackEvent {
            claims,
            reward,
            received_at_ms: Utc::now().timestamp_millis(),
        };
        let offset = self.log.append(event).await?;
        debug!(pool_id = %pool_id, offset, reward, "feedback accepted");
        Ok(TrainAck { offset, pool_id })
    }

    fn state_key(&self, descriptor: &ExperimentDescriptor) -> StateKey {
        StateKey::new(
            descriptor.tenant_id.clone(),
            descriptor.pool.id.clone(),
            descriptor.family,
        )
    }
}

/// Apply one verified reward to a parameter state.
///
/// Pure with respect to storage; the trainer calls this per event and
/// persists the result once per pool per batch.
pub fn apply_feedback(state: &mut ParamState, claims: &TokenClaims, reward: f64) -> Result<()> {
    if claims.family != state.family() {
        return Err(BanditError::contract(format!(
            "event family {} does not match stored state family {}",
            claims.family,
            state.family()
        )));
    }
    let context = Context::new(claims.context.clone());
    state.update(claims.arm_index, reward, &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryParamStore;
    use crate::config::EngineConfig;
    use crate::errors::TokenError;
    use crate::feedback::InMemoryFeedbackLog;
    use crate::policy::{AlgorithmFamily, PolicyInit};
    use crate::types::Pool;
    use std::time::Duration;

    fn descriptor(family: AlgorithmFamily, k: usize) -> ExperimentDescriptor {
        let arms = (0..k)
            .map(|i| Arm::new(format!("arm-{i}"), format!("Arm {i}")))
            .collect();
        ExperimentDescriptor {
            experiment_id: "exp-1".into(),
            tenant_id: "acme".into(),
            pool: Pool::new("pool-1", arms),
            family,
            init: PolicyInit::default(),
        }
    }

    fn harness() -> (Agent, Arc<InMemoryFeedbackLog>) {
        let cfg = EngineConfig::default();
        let backend = Arc::new(ParamBackend::new(
            Arc::new(InMemoryParamStore::new()),
            &cfg.cache,
        ));
        let log = Arc::new(InMemoryFeedbackLog::new(1_000));
        let agent = Agent::with_seed(backend, log.clone(), TokenCodec::new(&cfg.token), 42);
        (agent, log)
    }

    #[tokio::test]
    async fn empty_pool_is_rejected() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 0);
        let err = agent.select(&desc, &Context::empty()).await.unwrap_err();
        assert!(matches!(err, BanditError::PoolEmpty { .. }));
    }

    #[tokio::test]
    async fn select_before_initialize_is_unavailable() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 3);
        let err = agent.select(&desc, &Context::empty()).await.unwrap_err();
        assert!(matches!(err, BanditError::StateUnavailable { .. }));
    }

    #[tokio::test]
    async fn initialize_then_select_yields_valid_token() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 3);
        let outcome = agent.initialize_experiment(&desc).await.unwrap();
        assert_eq!(outcome, InitOutcome::Created { version: 1 });

        let selection = agent.select(&desc, &Context::empty()).await.unwrap();
        assert!(selection.arm_index < 3);
        assert_eq!(selection.state_version, 1);

        let codec = TokenCodec::new(&EngineConfig::default().token);
        let claims = codec.decode(&selection.token).unwrap();
        assert_eq!(claims.arm_index, selection.arm_index);
        assert_eq!(claims.nonce, selection.request_id);
        assert_eq!(claims.state_version, 1);
        assert!(claims.context.is_empty());
    }

    #[tokio::test]
    async fn second_initialize_preserves_existing_state() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 2);
        agent.initialize_experiment(&desc).await.unwrap();
        let outcome = agent.initialize_experiment(&desc).await.unwrap();
        assert_eq!(outcome, InitOutcome::AlreadyInitialized);
    }

    #[tokio::test]
    async fn arm_count_mismatch_is_a_contract_violation() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 2);
        agent.initialize_experiment(&desc).await.unwrap();

        let grown = descriptor(AlgorithmFamily::BetaTs, 4);
        let err = agent.select(&grown, &Context::empty()).await.unwrap_err();
        assert!(matches!(err, BanditError::ContractViolation(_)));
    }

    #[tokio::test]
    async fn contextual_selection_embeds_the_context() {
        let (agent, _) = harness();
        let mut desc = descriptor(AlgorithmFamily::LinUcb, 2);
        desc.init.dim = 3;
        agent.initialize_experiment(&desc).await.unwrap();

        let ctx = Context::new(vec![0.1, 0.2, 0.3]);
        let selection = agent.select(&desc, &ctx).await.unwrap();
        let codec = TokenCodec::new(&EngineConfig::default().token);
        let claims = codec.decode(&selection.token).unwrap();
        assert_eq!(claims.context, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn train_appends_exactly_one_event() {
        let (agent, log) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 2);
        agent.initialize_experiment(&desc).await.unwrap();
        let selection = agent.select(&desc, &Context::empty()).await.unwrap();

        let ack = agent.train(&selection.token, 1.0).await.unwrap();
        assert_eq!(ack.pool_id, "pool-1");

        let batch = log.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0, ack.offset);
        assert_eq!(batch[0].1.reward, 1.0);
        assert_eq!(batch[0].1.claims.nonce, selection.request_id);
    }

    #[tokio::test]
    async fn bad_token_produces_no_event() {
        let (agent, log) = harness();
        let err = agent.train("not-a-token", 1.0).await.unwrap_err();
        assert!(matches!(err, BanditError::Token(TokenError::Invalid(_))));
        assert!(log.poll(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_token_produces_no_event() {
        let (agent, log) = harness();
        // Same secret as the agent's codec, but issued far in the past.
        let codec = TokenCodec::new(&EngineConfig::default().token);
        let claims = TokenClaims {
            tenant_id: "acme".into(),
            experiment_id: "exp-1".into(),
            pool_id: "pool-1".into(),
            arm_index: 0,
            family: AlgorithmFamily::BetaTs,
            state_version: 1,
            context: Vec::new(),
            issued_at_ms: 0,
            nonce: Uuid::new_v4(),
        };
        let token = codec.encode(&claims).unwrap();

        let err = agent.train(&token, 1.0).await.unwrap_err();
        assert!(matches!(err, BanditError::Token(TokenError::Expired { .. })));
        assert!(log.poll(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_reward_kind_produces_no_event() {
        let (agent, log) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 2);
        agent.initialize_experiment(&desc).await.unwrap();
        let selection = agent.select(&desc, &Context::empty()).await.unwrap();

        let err = agent.train(&selection.token, 0.5).await.unwrap_err();
        assert!(matches!(err, BanditError::RewardTypeMismatch { .. }));
        assert!(log.poll(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeded_agents_select_identically() {
        let desc = descriptor(AlgorithmFamily::BetaTs, 4);
        let mut runs = Vec::new();
        for _ in 0..2 {
            let cfg = EngineConfig::default();
            let backend = Arc::new(ParamBackend::new(
                Arc::new(InMemoryParamStore::new()),
                &cfg.cache,
            ));
            let log = Arc::new(InMemoryFeedbackLog::new(100));
            let agent = Agent::with_seed(backend, log, TokenCodec::new(&cfg.token), 7);
            agent.initialize_experiment(&desc).await.unwrap();
            let mut picks = Vec::new();
            for _ in 0..20 {
                picks.push(agent.select(&desc, &Context::empty()).await.unwrap().arm_index);
            }
            runs.push(picks);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn parallel_selects_leave_state_untouched() {
        let (agent, _) = harness();
        let desc = descriptor(AlgorithmFamily::BetaTs, 3);
        agent.initialize_experiment(&desc).await.unwrap();

        let agent = Arc::new(agent);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let agent = agent.clone();
            let desc = desc.clone();
            handles.push(tokio::spawn(async move {
                agent.select(&desc, &Context::empty()).await
            }));
        }
        for h in handles {
            let selection = h.await.unwrap().unwrap();
            assert!(selection.arm_index < 3);
            // Selection never writes: version stays at the initial value.
            assert_eq!(selection.state_version, 1);
        }
    }

    #[tokio::test]
    async fn apply_feedback_rejects_family_mismatch() {
        let mut state =
            ParamState::init(AlgorithmFamily::BetaTs, 2, &PolicyInit::default()).unwrap();
        let claims = TokenClaims {
            tenant_id: "acme".into(),
            experiment_id: "exp".into(),
            pool_id: "pool-1".into(),
            arm_index: 0,
            family: AlgorithmFamily::Moss,
            state_version: 1,
            context: Vec::new(),
            issued_at_ms: 0,
            nonce: Uuid::new_v4(),
        };
        let err = apply_feedback(&mut state, &claims, 1.0).unwrap_err();
        assert!(matches!(err, BanditError::ContractViolation(_)));
    }

    #[test]
    fn apply_feedback_updates_the_chosen_arm() {
        let mut state =
            ParamState::init(AlgorithmFamily::BetaTs, 2, &PolicyInit::default()).unwrap();
        let claims = TokenClaims {
            tenant_id: "acme".into(),
            experiment_id: "exp".into(),
            pool_id: "pool-1".into(),
            arm_index: 1,
            family: AlgorithmFamily::BetaTs,
            state_version: 1,
            context: Vec::new(),
            issued_at_ms: 0,
            nonce: Uuid::new_v4(),
        };
        apply_feedback(&mut state, &claims, 1.0).unwrap();
        match state {
            ParamState::BetaTs(s) => {
                assert_eq!(s.alpha, vec![1.0, 2.0]);
                assert_eq!(s.pulls, vec![0, 1]);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
