//! Versioned per-(pool, family) statistical state.
//!
//! [`ParamState`] is a tagged union keyed by algorithm family: the variant
//! fully determines which sufficient statistics exist, and the shape is never
//! partially migrated. Serialization must round-trip exactly (the durable
//! store treats the payload as opaque).

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{BanditError, Result};
use crate::types::{Context, RewardKind};

use super::{adversarial, epsilon, linear, moss, thompson, ucb};
use super::{AlgorithmFamily, PolicyInit};

/// Beta-Bernoulli Thompson Sampling statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaTsState {
    /// Per-arm prior + observed successes (> 0)
    pub alpha: Vec<f64>,
    /// Per-arm prior + observed failures (> 0)
    pub beta: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
}

/// Gaussian Thompson Sampling statistics (known noise precision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianTsState {
    /// Observation noise precision shared by all arms (> 0)
    pub noise_precision: f64,
    /// Per-arm posterior mean
    pub mean: Vec<f64>,
    /// Per-arm posterior precision (> 0)
    pub precision: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
}

/// UCB1-Tuned statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ucb1TunedState {
    /// Exploration scale (> 0)
    pub alpha: f64,
    /// Per-arm empirical mean reward
    pub mean: Vec<f64>,
    /// Per-arm sum of squared rewards (for the variance bound)
    pub reward_sq_sum: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
    /// Total updates seen
    pub round: u64,
}

/// KL-UCB statistics, shared by the plain and `+` variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlUcbState {
    /// log-log coefficient in the exploration threshold (>= 0)
    pub c: f64,
    /// Per-arm reward sum
    pub reward_sum: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
    /// Total updates seen
    pub round: u64,
}

/// MOSS statistics, shared by the fixed-horizon and anytime variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MossState {
    /// Fixed horizon (> 0; the anytime variant uses `round` instead)
    pub horizon: u64,
    /// Per-arm empirical mean reward
    pub mean: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
    /// Total updates seen
    pub round: u64,
}

/// Epsilon-greedy statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpsilonGreedyState {
    /// Current exploration probability, in [0, 1]
    pub eps: f64,
    /// Multiplicative decay applied per update, in [0, 1]
    pub decay: f64,
    /// Per-arm empirical mean reward
    pub mean: Vec<f64>,
    /// Per-arm pull counts
    pub pulls: Vec<u64>,
}

/// EXP3 statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exp3State {
    /// Exploration parameter, in (0, 1]. Guarantees every arm keeps
    /// selection probability >= gamma / k.
    pub gamma: f64,
    /// Per-arm non-negative weights, renormalized after each update
    pub weights: Vec<f64>,
}

/// Follow-the-Perturbed-Leader statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FplState {
    /// Exponential perturbation scale (> 0)
    pub eta: f64,
    /// Per-arm cumulative reward
    pub cum_reward: Vec<f64>,
}

/// Linear UCB statistics (per-arm ridge regression).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinUcbState {
    /// Feature dimension
    pub dim: usize,
    /// Ridge regularization (A initialized to lambda * I)
    pub lambda: f64,
    /// Exploration strength
    pub alpha: f64,
    /// Per-arm design matrices, symmetric positive-definite by construction
    pub a: Vec<DMatrix<f64>>,
    /// Per-arm reward-weighted context sums
    pub b: Vec<DVector<f64>>,
}

/// Linear Thompson Sampling statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinTsState {
    /// Feature dimension
    pub dim: usize,
    /// Ridge regularization (A initialized to lambda * I)
    pub lambda: f64,
    /// Posterior covariance scale (> 0)
    pub v: f64,
    /// Per-arm design matrices, symmetric positive-definite by construction
    pub a: Vec<DMatrix<f64>>,
    /// Per-arm reward-weighted context sums
    pub b: Vec<DVector<f64>>,
}

/// Tagged union of all family states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ParamState {
    BetaTs(BetaTsState),
    GaussianTs(GaussianTsState),
    Ucb1Tuned(Ucb1TunedState),
    KlUcb(KlUcbState),
    KlUcbPlus(KlUcbState),
    Moss(MossState),
    MossAnytime(MossState),
    EpsilonGreedy(EpsilonGreedyState),
    Exp3(Exp3State),
    Fpl(FplState),
    LinUcb(LinUcbState),
    LinTs(LinTsState),
}

impl ParamState {
    /// Initialize a fresh state with algorithm-specific priors for `k` arms.
    pub fn init(family: AlgorithmFamily, k: usize, init: &PolicyInit) -> Result<Self> {
        if k == 0 {
            return Err(BanditError::contract("cannot initialize state for 0 arms"));
        }
        validate_init(family, init)?;
        let state = match family {
            AlgorithmFamily::BetaTs => ParamState::BetaTs(BetaTsState {
                alpha: vec![init.alpha_prior; k],
                beta: vec![init.beta_prior; k],
                pulls: vec![0; k],
            }),
            AlgorithmFamily::GaussianTs => ParamState::GaussianTs(GaussianTsState {
                noise_precision: init.noise_precision,
                mean: vec![init.prior_mean; k],
                precision: vec![init.prior_precision; k],
                pulls: vec![0; k],
            }),
            AlgorithmFamily::Ucb1Tuned => ParamState::Ucb1Tuned(Ucb1TunedState {
                alpha: init.ucb_alpha,
                mean: vec![0.0; k],
                reward_sq_sum: vec![0.0; k],
                pulls: vec![0; k],
                round: 0,
            }),
            AlgorithmFamily::KlUcb | AlgorithmFamily::KlUcbPlus => {
                let inner = KlUcbState {
                    c: init.kl_c,
                    reward_sum: vec![0.0; k],
                    pulls: vec![0; k],
                    round: 0,
                };
                if family == AlgorithmFamily::KlUcb {
                    ParamState::KlUcb(inner)
                } else {
                    ParamState::KlUcbPlus(inner)
                }
            }
            AlgorithmFamily::Moss | AlgorithmFamily::MossAnytime => {
                let inner = MossState {
                    horizon: init.horizon,
                    mean: vec![0.0; k],
                    pulls: vec![0; k],
                    round: 0,
                };
                if family == AlgorithmFamily::Moss {
                    ParamState::Moss(inner)
                } else {
                    ParamState::MossAnytime(inner)
                }
            }
            AlgorithmFamily::EpsilonGreedy => ParamState::EpsilonGreedy(EpsilonGreedyState {
                eps: init.eps,
                decay: init.eps_decay,
                mean: vec![0.0; k],
                pulls: vec![0; k],
            }),
            AlgorithmFamily::Exp3 => ParamState::Exp3(Exp3State {
                gamma: init.gamma,
                weights: vec![1.0 / k as f64; k],
            }),
            AlgorithmFamily::Fpl => ParamState::Fpl(FplState {
                eta: init.eta,
                cum_reward: vec![0.0; k],
            }),
            AlgorithmFamily::LinUcb => ParamState::LinUcb(LinUcbState {
                dim: init.dim,
                lambda: init.lambda,
                alpha: init.lin_alpha,
                a: (0..k)
                    .map(|_| DMatrix::identity(init.dim, init.dim) * init.lambda)
                    .collect(),
                b: (0..k).map(|_| DVector::zeros(init.dim)).collect(),
            }),
            AlgorithmFamily::LinTs => ParamState::LinTs(LinTsState {
                dim: init.dim,
                lambda: init.lambda,
                v: init.lin_v,
                a: (0..k)
                    .map(|_| DMatrix::identity(init.dim, init.dim) * init.lambda)
                    .collect(),
                b: (0..k).map(|_| DVector::zeros(init.dim)).collect(),
            }),
        };
        Ok(state)
    }

    /// The family tag pinning this state's shape.
    pub fn family(&self) -> AlgorithmFamily {
        match self {
            ParamState::BetaTs(_) => AlgorithmFamily::BetaTs,
            ParamState::GaussianTs(_) => AlgorithmFamily::GaussianTs,
            ParamState::Ucb1Tuned(_) => AlgorithmFamily::Ucb1Tuned,
            ParamState::KlUcb(_) => AlgorithmFamily::KlUcb,
            ParamState::KlUcbPlus(_) => AlgorithmFamily::KlUcbPlus,
            ParamState::Moss(_) => AlgorithmFamily::Moss,
            ParamState::MossAnytime(_) => AlgorithmFamily::MossAnytime,
            ParamState::EpsilonGreedy(_) => AlgorithmFamily::EpsilonGreedy,
            ParamState::Exp3(_) => AlgorithmFamily::Exp3,
            ParamState::Fpl(_) => AlgorithmFamily::Fpl,
            ParamState::LinUcb(_) => AlgorithmFamily::LinUcb,
            ParamState::LinTs(_) => AlgorithmFamily::LinTs,
        }
    }

    /// Number of arms `k` this state was initialized with.
    pub fn num_arms(&self) -> usize {
        match self {
            ParamState::BetaTs(s) => s.alpha.len(),
            ParamState::GaussianTs(s) => s.mean.len(),
            ParamState::Ucb1Tuned(s) => s.mean.len(),
            ParamState::KlUcb(s) | ParamState::KlUcbPlus(s) => s.pulls.len(),
            ParamState::Moss(s) | ParamState::MossAnytime(s) => s.mean.len(),
            ParamState::EpsilonGreedy(s) => s.mean.len(),
            ParamState::Exp3(s) => s.weights.len(),
            ParamState::Fpl(s) => s.cum_reward.len(),
            ParamState::LinUcb(s) => s.a.len(),
            ParamState::LinTs(s) => s.a.len(),
        }
    }

    /// Reward kind accepted by this state's family.
    pub fn reward_kind(&self) -> RewardKind {
        self.family().reward_kind()
    }

    /// Select an arm index in `[0, k)`.
    ///
    /// Pure given `rng`; never mutates the state. Contextual families
    /// require `context.vector.len() == dim` and reject anything else as a
    /// contract violation (never silently pad or truncate).
    pub fn select<R: Rng>(&self, context: &Context, rng: &mut R) -> Result<usize> {
        match self {
            ParamState::BetaTs(s) => thompson::select_beta(s, rng),
            ParamState::GaussianTs(s) => thompson::select_gaussian(s, rng),
            ParamState::Ucb1Tuned(s) => Ok(ucb::select_ucb1_tuned(s, rng)),
            ParamState::KlUcb(s) => Ok(ucb::select_kl_ucb(s, false, rng)),
            ParamState::KlUcbPlus(s) => Ok(ucb::select_kl_ucb(s, true, rng)),
            ParamState::Moss(s) => Ok(moss::select(s, false, rng)),
            ParamState::MossAnytime(s) => Ok(moss::select(s, true, rng)),
            ParamState::EpsilonGreedy(s) => Ok(epsilon::select(s, rng)),
            ParamState::Exp3(s) => adversarial::select_exp3(s, rng),
            ParamState::Fpl(s) => adversarial::select_fpl(s, rng),
            ParamState::LinUcb(s) => linear::select_lin_ucb(s, context, rng),
            ParamState::LinTs(s) => linear::select_lin_ts(s, context, rng),
        }
    }

    /// Apply one observed reward for `arm`.
    ///
    /// Not idempotent: applying the same observation twice shifts the
    /// statistics twice. Replay protection lives upstream in the trainer's
    /// dedup window.
    pub fn update(&mut self, arm: usize, reward: f64, context: &Context) -> Result<()> {
        let k = self.num_arms();
        if arm >= k {
            return Err(BanditError::contract(format!(
                "arm index {arm} out of range (k = {k})"
            )));
        }
        self.reward_kind().validate(self.family(), reward)?;
        match self {
            ParamState::BetaTs(s) => thompson::update_beta(s, arm, reward),
            ParamState::GaussianTs(s) => thompson::update_gaussian(s, arm, reward),
            ParamState::Ucb1Tuned(s) => ucb::update_ucb1_tuned(s, arm, reward),
            ParamState::KlUcb(s) | ParamState::KlUcbPlus(s) => ucb::update_kl_ucb(s, arm, reward),
            ParamState::Moss(s) | ParamState::MossAnytime(s) => moss::update(s, arm, reward),
            ParamState::EpsilonGreedy(s) => epsilon::update(s, arm, reward),
            ParamState::Exp3(s) => adversarial::update_exp3(s, arm, reward),
            ParamState::Fpl(s) => adversarial::update_fpl(s, arm, reward),
            ParamState::LinUcb(s) => {
                let x = linear::context_vector(s.dim, context)?;
                linear::update_linear(&mut s.a, &mut s.b, arm, reward, &x);
            }
            ParamState::LinTs(s) => {
                let x = linear::context_vector(s.dim, context)?;
                linear::update_linear(&mut s.a, &mut s.b, arm, reward, &x);
            }
        }
        Ok(())
    }
}

fn validate_init(family: AlgorithmFamily, init: &PolicyInit) -> Result<()> {
    let bad = |msg: &str| Err(BanditError::contract(msg.to_string()));
    match family {
        AlgorithmFamily::BetaTs => {
            if init.alpha_prior <= 0.0 || init.beta_prior <= 0.0 {
                return bad("beta_ts priors must be > 0");
            }
        }
        AlgorithmFamily::GaussianTs => {
            if init.prior_precision <= 0.0 || init.noise_precision <= 0.0 {
                return bad("gaussian_ts precisions must be > 0");
            }
        }
        AlgorithmFamily::Ucb1Tuned => {
            if init.ucb_alpha <= 0.0 {
                return bad("ucb1_tuned alpha must be > 0");
            }
        }
        AlgorithmFamily::KlUcb | AlgorithmFamily::KlUcbPlus => {
            if init.kl_c < 0.0 {
                return bad("kl_ucb c must be >= 0");
            }
        }
        AlgorithmFamily::Moss => {
            if init.horizon == 0 {
                return bad("moss horizon must be > 0");
            }
        }
        AlgorithmFamily::MossAnytime => {}
        AlgorithmFamily::EpsilonGreedy => {
            if !(0.0..=1.0).contains(&init.eps) || !(0.0..=1.0).contains(&init.eps_decay) {
                return bad("epsilon_greedy eps and decay must be in [0, 1]");
            }
        }
        AlgorithmFamily::Exp3 => {
            if !(init.gamma > 0.0 && init.gamma <= 1.0) {
                return bad("exp3 gamma must be in (0, 1]");
            }
        }
        AlgorithmFamily::Fpl => {
            if init.eta <= 0.0 {
                return bad("fpl eta must be > 0");
            }
        }
        AlgorithmFamily::LinUcb => {
            if init.dim == 0 || init.lambda <= 0.0 || init.lin_alpha < 0.0 {
                return bad("lin_ucb requires dim > 0, lambda > 0, alpha >= 0");
            }
        }
        AlgorithmFamily::LinTs => {
            if init.dim == 0 || init.lambda <= 0.0 || init.lin_v <= 0.0 {
                return bad("lin_ts requires dim > 0, lambda > 0, v > 0");
            }
        }
    }
    Ok(())
}
