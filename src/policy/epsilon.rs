//! Epsilon-greedy with multiplicative epsilon decay.

use rand::Rng;

use super::argmax_tiebreak;
use super::state::EpsilonGreedyState;

/// Explore uniformly with probability eps, otherwise exploit the best
/// empirical mean. Unseen arms dominate the exploit branch so the first k
/// rounds are pure exploration regardless of eps.
pub(super) fn select<R: Rng>(state: &EpsilonGreedyState, rng: &mut R) -> usize {
    let k = state.mean.len();
    if rng.gen::<f64>() < state.eps {
        return rng.gen_range(0..k);
    }
    let scores: Vec<f64> = state
        .mean
        .iter()
        .zip(&state.pulls)
        .map(|(&mu, &n)| if n == 0 { f64::INFINITY } else { mu })
        .collect();
    argmax_tiebreak(&scores, rng).unwrap_or(0)
}

/// Incremental mean update; eps decays by `(1 - decay)` per update so
/// exploration anneals on the training path, never on the read path.
pub(super) fn update(state: &mut EpsilonGreedyState, arm: usize, reward: f64) {
    state.pulls[arm] += 1;
    let n = state.pulls[arm] as f64;
    state.mean[arm] += (reward - state.mean[arm]) / n;
    state.eps *= 1.0 - state.decay;
}
