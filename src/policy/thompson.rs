//! Thompson Sampling families: Beta-Bernoulli and Gaussian.

use rand::Rng;
use rand_distr::{Beta, Distribution, Normal};

use crate::errors::{BanditError, Result};

use super::argmax_tiebreak;
use super::state::{BetaTsState, GaussianTsState};

/// Sample Beta(alpha_i, beta_i) per arm and take the argmax.
///
/// Cold-start arms sample from the raw prior, which keeps them competitive
/// with any arm whose posterior has drifted below neutral.
pub(super) fn select_beta<R: Rng>(state: &BetaTsState, rng: &mut R) -> Result<usize> {
    let mut samples = Vec::with_capacity(state.alpha.len());
    for (&a, &b) in state.alpha.iter().zip(&state.beta) {
        let dist = Beta::new(a, b)
            .map_err(|e| BanditError::contract(format!("invalid beta parameters ({a}, {b}): {e}")))?;
        samples.push(dist.sample(rng));
    }
    argmax_tiebreak(&samples, rng)
        .ok_or_else(|| BanditError::contract("select on empty beta_ts state"))
}

/// Bernoulli conjugate update: success bumps alpha, failure bumps beta.
///
/// A non-binary reward is treated as success when > 0.5 (the feedback
/// boundary already rejects such rewards; this keeps the pure update total).
pub(super) fn update_beta(state: &mut BetaTsState, arm: usize, reward: f64) {
    state.pulls[arm] += 1;
    if reward > 0.5 {
        state.alpha[arm] += 1.0;
    } else {
        state.beta[arm] += 1.0;
    }
}

/// Sample Normal(mean_i, 1/sqrt(precision_i)) per arm and take the argmax.
pub(super) fn select_gaussian<R: Rng>(state: &GaussianTsState, rng: &mut R) -> Result<usize> {
    let mut samples = Vec::with_capacity(state.mean.len());
    for (&mu, &prec) in state.mean.iter().zip(&state.precision) {
        let sd = 1.0 / prec.sqrt();
        let dist = Normal::new(mu, sd).map_err(|e| {
            BanditError::contract(format!("invalid gaussian parameters ({mu}, {sd}): {e}"))
        })?;
        samples.push(dist.sample(rng));
    }
    argmax_tiebreak(&samples, rng)
        .ok_or_else(|| BanditError::contract("select on empty gaussian_ts state"))
}

/// Gaussian-Gaussian conjugate update with known noise precision.
pub(super) fn update_gaussian(state: &mut GaussianTsState, arm: usize, reward: f64) {
    let prev_precision = state.precision[arm];
    let prev_mean = state.mean[arm];
    let new_precision = prev_precision + state.noise_precision;
    state.mean[arm] =
        (prev_precision * prev_mean + state.noise_precision * reward) / new_precision;
    state.precision[arm] = new_precision;
    state.pulls[arm] += 1;
}
