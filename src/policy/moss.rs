//! MOSS: minimax-optimal index policy, fixed-horizon and anytime variants.

use rand::Rng;

use super::argmax_tiebreak;
use super::state::MossState;

/// MOSS index: `mu_i + sqrt(max(ln(n / (K * T_i)), 0) / T_i)`.
///
/// The anytime variant substitutes the current round for the horizon,
/// trading slightly worse regret constants for not needing n up front.
fn moss_index(state: &MossState, arm: usize, anytime: bool) -> f64 {
    let t_i = state.pulls[arm];
    if t_i == 0 {
        return f64::INFINITY;
    }
    let n = if anytime {
        state.round.max(1) as f64
    } else {
        state.horizon as f64
    };
    let k = state.mean.len() as f64;
    let t_f = t_i as f64;
    let log_term = if n > k * t_f { (n / (k * t_f)).ln() } else { 0.0 };
    state.mean[arm] + (log_term.max(0.0) / t_f).sqrt()
}

pub(super) fn select<R: Rng>(state: &MossState, anytime: bool, rng: &mut R) -> usize {
    let indices: Vec<f64> = (0..state.mean.len())
        .map(|i| moss_index(state, i, anytime))
        .collect();
    argmax_tiebreak(&indices, rng).unwrap_or(0)
}

pub(super) fn update(state: &mut MossState, arm: usize, reward: f64) {
    state.pulls[arm] += 1;
    let n = state.pulls[arm] as f64;
    state.mean[arm] += (reward - state.mean[arm]) / n;
    state.round += 1;
}
