//! Bandit policy implementations.
//!
//! Each algorithm family is a pure `select`/`update` pair over its own
//! sufficient statistics. The family set is closed and finite, so dispatch is
//! a pattern match on [`ParamState`] rather than open-ended trait objects.
//!
//! Selection is deterministic given the injected random source; nothing in
//! this module performs I/O or touches shared state.

mod adversarial;
mod epsilon;
mod linear;
mod moss;
mod state;
mod thompson;
mod ucb;

pub use state::{
    BetaTsState, EpsilonGreedyState, Exp3State, FplState, GaussianTsState, KlUcbState, LinTsState,
    LinUcbState, MossState, ParamState, Ucb1TunedState,
};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::RewardKind;

/// Closed set of supported algorithm families.
///
/// The family tag pins the shape of the parameter state; it never changes
/// over the lifetime of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmFamily {
    /// Beta-Bernoulli Thompson Sampling (binary rewards)
    BetaTs,
    /// Gaussian Thompson Sampling with known noise precision
    GaussianTs,
    /// UCB1-Tuned (variance-aware confidence bounds)
    Ucb1Tuned,
    /// KL-UCB for Bernoulli rewards
    KlUcb,
    /// KL-UCB+ variant with log(t/N) exploration threshold
    KlUcbPlus,
    /// MOSS with a fixed horizon
    Moss,
    /// Anytime MOSS (current round as horizon proxy)
    MossAnytime,
    /// Epsilon-greedy with multiplicative epsilon decay
    EpsilonGreedy,
    /// EXP3 adversarial bandit
    Exp3,
    /// Follow the Perturbed Leader (exponential perturbation)
    Fpl,
    /// Linear UCB (contextual, ridge regression)
    LinUcb,
    /// Linear Thompson Sampling (contextual)
    LinTs,
}

impl AlgorithmFamily {
    /// All known families, in a stable order.
    pub const ALL: [AlgorithmFamily; 12] = [
        AlgorithmFamily::BetaTs,
        AlgorithmFamily::GaussianTs,
        AlgorithmFamily::Ucb1Tuned,
        AlgorithmFamily::KlUcb,
        AlgorithmFamily::KlUcbPlus,
        AlgorithmFamily::Moss,
        AlgorithmFamily::MossAnytime,
        AlgorithmFamily::EpsilonGreedy,
        AlgorithmFamily::Exp3,
        AlgorithmFamily::Fpl,
        AlgorithmFamily::LinUcb,
        AlgorithmFamily::LinTs,
    ];

    /// Stable wire name (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmFamily::BetaTs => "beta_ts",
            AlgorithmFamily::GaussianTs => "gaussian_ts",
            AlgorithmFamily::Ucb1Tuned => "ucb1_tuned",
            AlgorithmFamily::KlUcb => "kl_ucb",
            AlgorithmFamily::KlUcbPlus => "kl_ucb_plus",
            AlgorithmFamily::Moss => "moss",
            AlgorithmFamily::MossAnytime => "moss_anytime",
            AlgorithmFamily::EpsilonGreedy => "epsilon_greedy",
            AlgorithmFamily::Exp3 => "exp3",
            AlgorithmFamily::Fpl => "fpl",
            AlgorithmFamily::LinUcb => "lin_ucb",
            AlgorithmFamily::LinTs => "lin_ts",
        }
    }

    /// Reward values this family accepts at the feedback boundary.
    pub fn reward_kind(self) -> RewardKind {
        match self {
            AlgorithmFamily::BetaTs | AlgorithmFamily::KlUcb | AlgorithmFamily::KlUcbPlus => {
                RewardKind::Binary
            }
            _ => RewardKind::Real,
        }
    }

    /// Whether `select` consumes the context feature vector.
    pub fn is_contextual(self) -> bool {
        matches!(self, AlgorithmFamily::LinUcb | AlgorithmFamily::LinTs)
    }
}

impl std::fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlgorithmFamily {
    type Err = crate::errors::BanditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| crate::errors::BanditError::contract(format!("unknown family: {s}")))
    }
}

/// Priors and hyperparameters for initializing a parameter state.
///
/// Only the fields relevant to the chosen family are read; the rest keep
/// their defaults. Defaults mirror the reference deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyInit {
    /// Beta-TS prior successes (> 0)
    pub alpha_prior: f64,
    /// Beta-TS prior failures (> 0)
    pub beta_prior: f64,
    /// Gaussian-TS prior mean
    pub prior_mean: f64,
    /// Gaussian-TS prior precision (> 0)
    pub prior_precision: f64,
    /// Gaussian-TS known observation noise precision (> 0)
    pub noise_precision: f64,
    /// UCB1-Tuned exploration scale (> 0)
    pub ucb_alpha: f64,
    /// KL-UCB log-log coefficient (>= 0)
    pub kl_c: f64,
    /// MOSS horizon (> 0; ignored by the anytime variant)
    pub horizon: u64,
    /// Epsilon-greedy initial exploration probability, in [0, 1]
    pub eps: f64,
    /// Epsilon-greedy per-update decay, in [0, 1]
    pub eps_decay: f64,
    /// EXP3 exploration parameter, in (0, 1]
    pub gamma: f64,
    /// FPL perturbation scale (> 0)
    pub eta: f64,
    /// Contextual feature dimension (> 0)
    pub dim: usize,
    /// Ridge regularization for the linear families (> 0)
    pub lambda: f64,
    /// LinUCB exploration strength (>= 0)
    pub lin_alpha: f64,
    /// LinTS posterior scale (> 0)
    pub lin_v: f64,
}

impl Default for PolicyInit {
    fn default() -> Self {
        Self {
            alpha_prior: 1.0,
            beta_prior: 1.0,
            prior_mean: 0.0,
            prior_precision: 1.0,
            noise_precision: 1.0,
            ucb_alpha: 2.0,
            kl_c: 0.0,
            horizon: 10_000,
            eps: 0.1,
            eps_decay: 0.0,
            gamma: 0.1,
            eta: 5.0,
            dim: 8,
            lambda: 1.0,
            lin_alpha: 1.5,
            lin_v: 1.0,
        }
    }
}

/// Index of the maximum score, breaking exact ties uniformly at random.
///
/// Ties must never resolve by array order: that would systematically bias
/// selection toward low-index arms whenever scores collide (common for
/// fresh states where every score is identical).
pub(crate) fn argmax_tiebreak<R: Rng>(scores: &[f64], rng: &mut R) -> Option<usize> {
    let mut best = f64::NEG_INFINITY;
    let mut chosen = None;
    let mut ties = 0u32;
    for (i, &score) in scores.iter().enumerate() {
        if score > best || chosen.is_none() {
            best = score;
            chosen = Some(i);
            ties = 1;
        } else if score == best {
            ties += 1;
            if rng.gen_range(0..ties) == 0 {
                chosen = Some(i);
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn family_name_round_trip() {
        for family in AlgorithmFamily::ALL {
            let parsed: AlgorithmFamily = family.as_str().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert!("not_a_family".parse::<AlgorithmFamily>().is_err());
    }

    #[test]
    fn binary_families() {
        assert_eq!(AlgorithmFamily::BetaTs.reward_kind(), RewardKind::Binary);
        assert_eq!(AlgorithmFamily::KlUcb.reward_kind(), RewardKind::Binary);
        assert_eq!(AlgorithmFamily::KlUcbPlus.reward_kind(), RewardKind::Binary);
        assert_eq!(AlgorithmFamily::GaussianTs.reward_kind(), RewardKind::Real);
        assert_eq!(AlgorithmFamily::LinUcb.reward_kind(), RewardKind::Real);
    }

    #[test]
    fn argmax_picks_unique_max() {
        let mut rng = StdRng::seed_from_u64(7);
        let scores = [0.1, 0.9, 0.3];
        for _ in 0..20 {
            assert_eq!(argmax_tiebreak(&scores, &mut rng), Some(1));
        }
    }

    #[test]
    fn argmax_breaks_ties_uniformly() {
        let mut rng = StdRng::seed_from_u64(11);
        let scores = [1.0, 1.0, 1.0, 0.5];
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(argmax_tiebreak(&scores, &mut rng).unwrap());
        }
        assert_eq!(seen, HashSet::from([0, 1, 2]));
    }

    #[test]
    fn argmax_handles_all_infinite() {
        let mut rng = StdRng::seed_from_u64(3);
        let scores = [f64::INFINITY, f64::INFINITY];
        let mut seen = HashSet::new();
        for _ in 0..100 {
            seen.insert(argmax_tiebreak(&scores, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn argmax_empty_is_none() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(argmax_tiebreak(&[], &mut rng), None);
    }
}
