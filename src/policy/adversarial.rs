//! Adversarial family: EXP3 and Follow the Perturbed Leader.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::errors::{BanditError, Result};

use super::argmax_tiebreak;
use super::state::{Exp3State, FplState};

/// Cap on the weight-update exponent. Keeps the exponential finite even for
/// large importance-weighted estimates; weights are renormalized afterwards
/// so only relative magnitude matters.
const MAX_EXPONENT: f64 = 50.0;

impl Exp3State {
    /// The induced selection distribution:
    /// `p_i = (1 - gamma) * w_i / sum(w) + gamma / k`.
    ///
    /// Every probability is bounded below by `gamma / k`, so the
    /// importance-weighted update can never divide by zero.
    pub fn probabilities(&self) -> Vec<f64> {
        let k = self.weights.len();
        let sum: f64 = self.weights.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return vec![1.0 / k as f64; k];
        }
        self.weights
            .iter()
            .map(|&w| (1.0 - self.gamma) * (w / sum) + self.gamma / k as f64)
            .collect()
    }
}

/// Draw an arm from the EXP3 distribution.
pub(super) fn select_exp3<R: Rng>(state: &Exp3State, rng: &mut R) -> Result<usize> {
    let probs = state.probabilities();
    if probs.is_empty() {
        return Err(BanditError::contract("select on empty exp3 state"));
    }
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return Ok(i);
        }
    }
    // Rounding left a sliver at the top of the cumulative distribution.
    Ok(probs.len() - 1)
}

/// Importance-weighted exponential update of the chosen arm's weight.
pub(super) fn update_exp3(state: &mut Exp3State, arm: usize, reward: f64) {
    let probs = state.probabilities();
    let k = state.weights.len() as f64;
    let estimate = reward / probs[arm];
    let exponent = (estimate * state.gamma / k).min(MAX_EXPONENT);
    state.weights[arm] *= exponent.exp();

    // Renormalize to keep weights bounded.
    let sum: f64 = state.weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for w in &mut state.weights {
            *w /= sum;
        }
    } else {
        let uniform = 1.0 / k;
        for w in &mut state.weights {
            *w = uniform;
        }
    }
}

/// Argmax of cumulative reward plus Exp(eta) perturbation.
pub(super) fn select_fpl<R: Rng>(state: &FplState, rng: &mut R) -> Result<usize> {
    let dist = Exp::new(1.0 / state.eta)
        .map_err(|e| BanditError::contract(format!("invalid fpl eta {}: {e}", state.eta)))?;
    let perturbed: Vec<f64> = state
        .cum_reward
        .iter()
        .map(|&r| r + dist.sample(rng))
        .collect();
    argmax_tiebreak(&perturbed, rng)
        .ok_or_else(|| BanditError::contract("select on empty fpl state"))
}

/// Plain cumulative reward update; no noise on the training path.
pub(super) fn update_fpl(state: &mut FplState, arm: usize, reward: f64) {
    state.cum_reward[arm] += reward;
}
