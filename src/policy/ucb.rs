//! UCB family: UCB1-Tuned and KL-UCB (plain and `+`).

use rand::Rng;

use super::argmax_tiebreak;
use super::state::{KlUcbState, Ucb1TunedState};

/// Bisection tolerance for the KL-UCB upper bound.
const KL_TOLERANCE: f64 = 1e-6;
/// Bisection iteration cap.
const KL_MAX_ITERATIONS: usize = 50;

fn ucb1_tuned_bound(state: &Ucb1TunedState, arm: usize) -> f64 {
    let t_i = state.pulls[arm];
    if t_i == 0 {
        return f64::INFINITY;
    }
    let n = t_i as f64;
    let mu = state.mean[arm];
    let log_round = ((state.round + 1) as f64).ln();
    // Empirical variance plus its own confidence slack, capped at the
    // Bernoulli worst case of 1/4.
    let variance = (state.reward_sq_sum[arm] / n - mu * mu).max(0.0);
    let slack = (state.alpha * log_round / n).sqrt();
    let var_bound = (variance + slack).min(0.25);
    mu + (var_bound * log_round / n).sqrt()
}

pub(super) fn select_ucb1_tuned<R: Rng>(state: &Ucb1TunedState, rng: &mut R) -> usize {
    let bounds: Vec<f64> = (0..state.mean.len())
        .map(|i| ucb1_tuned_bound(state, i))
        .collect();
    argmax_tiebreak(&bounds, rng).unwrap_or(0)
}

pub(super) fn update_ucb1_tuned(state: &mut Ucb1TunedState, arm: usize, reward: f64) {
    state.pulls[arm] += 1;
    state.reward_sq_sum[arm] += reward * reward;
    let n = state.pulls[arm] as f64;
    state.mean[arm] += (reward - state.mean[arm]) / n;
    state.round += 1;
}

/// KL divergence between Bernoulli(p) and Bernoulli(q).
fn kl_bernoulli(p: f64, q: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    let q = q.clamp(0.0, 1.0);
    if p == 0.0 {
        if q == 1.0 {
            return f64::INFINITY;
        }
        return -(1.0 - q).ln();
    }
    if p == 1.0 {
        if q == 0.0 {
            return f64::INFINITY;
        }
        return -q.ln();
    }
    if q == 0.0 || q == 1.0 {
        return f64::INFINITY;
    }
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// Invert the KL divergence by bisection: the largest q >= p_hat with
/// kl(p_hat, q) <= threshold.
///
/// Always returns a point from the satisfying side of the bracket. The KL
/// curve is steep near q = 1, so even a tight q-space bracket can straddle
/// the threshold by a large KL margin; returning the midpoint there would
/// overshoot.
fn kl_upper_inverse(p_hat: f64, threshold: f64) -> f64 {
    if threshold < 1e-10 {
        return p_hat;
    }
    let (mut left, mut right) = (p_hat, 1.0);
    if kl_bernoulli(p_hat, right) <= threshold {
        return right;
    }
    for _ in 0..KL_MAX_ITERATIONS {
        let mid = (left + right) / 2.0;
        if kl_bernoulli(p_hat, mid) <= threshold {
            left = mid;
        } else {
            right = mid;
        }
        if right - left < KL_TOLERANCE {
            break;
        }
    }
    left
}

fn kl_ucb_bound(state: &KlUcbState, arm: usize, plus: bool) -> f64 {
    let n = state.pulls[arm];
    if n == 0 {
        return f64::INFINITY;
    }
    let n_f = n as f64;
    let p_hat = state.reward_sum[arm] / n_f;
    let t = (state.round + 1).max(1) as f64;

    let threshold = if plus {
        // KL-UCB+: log(t / N_i) in place of log(t).
        let ratio = (t / n_f).max(1.0);
        let log_ratio = ratio.ln();
        if log_ratio <= 0.0 {
            return p_hat;
        }
        let log_log = if log_ratio > 1.0 { log_ratio.ln() } else { 0.0 };
        (log_ratio + state.c * log_log) / n_f
    } else {
        if t <= 1.0 {
            return p_hat;
        }
        let log_t = t.ln();
        let log_log = if log_t > 1.0 { log_t.ln() } else { 0.0 };
        (log_t + state.c * log_log) / n_f
    };

    kl_upper_inverse(p_hat, threshold)
}

pub(super) fn select_kl_ucb<R: Rng>(state: &KlUcbState, plus: bool, rng: &mut R) -> usize {
    let bounds: Vec<f64> = (0..state.pulls.len())
        .map(|i| kl_ucb_bound(state, i, plus))
        .collect();
    argmax_tiebreak(&bounds, rng).unwrap_or(0)
}

pub(super) fn update_kl_ucb(state: &mut KlUcbState, arm: usize, reward: f64) {
    state.pulls[arm] += 1;
    state.reward_sum[arm] += reward;
    state.round += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seen_ucb_state() -> Ucb1TunedState {
        let mut state = Ucb1TunedState {
            alpha: 2.0,
            mean: vec![0.0; 3],
            reward_sq_sum: vec![0.0; 3],
            pulls: vec![0; 3],
            round: 0,
        };
        // Arm 0 mediocre, arm 1 good, arm 2 unseen.
        for _ in 0..10 {
            update_ucb1_tuned(&mut state, 0, 0.2);
            update_ucb1_tuned(&mut state, 1, 0.8);
        }
        state
    }

    #[test]
    fn ucb1_tuned_prefers_unseen_arm() {
        let state = seen_ucb_state();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(select_ucb1_tuned(&state, &mut rng), 2);
    }

    #[test]
    fn ucb1_tuned_incremental_mean() {
        let mut state = Ucb1TunedState {
            alpha: 2.0,
            mean: vec![0.0],
            reward_sq_sum: vec![0.0],
            pulls: vec![0],
            round: 0,
        };
        update_ucb1_tuned(&mut state, 0, 1.0);
        update_ucb1_tuned(&mut state, 0, 0.0);
        update_ucb1_tuned(&mut state, 0, 0.5);
        assert!((state.mean[0] - 0.5).abs() < 1e-12);
        assert_eq!(state.pulls[0], 3);
        assert_eq!(state.round, 3);
    }

    #[test]
    fn kl_bernoulli_edge_cases() {
        assert_eq!(kl_bernoulli(0.0, 1.0), f64::INFINITY);
        assert_eq!(kl_bernoulli(1.0, 0.0), f64::INFINITY);
        assert_eq!(kl_bernoulli(0.5, 0.0), f64::INFINITY);
        assert!(kl_bernoulli(0.5, 0.5).abs() < 1e-12);
        assert!(kl_bernoulli(0.3, 0.7) > 0.0);
    }

    #[test]
    fn kl_inverse_stays_under_threshold_near_saturation() {
        // Large thresholds push q toward 1, where the KL curve is steep; the
        // returned bound must still sit on the satisfying side.
        let p_hat = 0.6071;
        let threshold = 2.8421;
        let q = kl_upper_inverse(p_hat, threshold);
        assert!((p_hat..=1.0).contains(&q));
        assert!(
            kl_bernoulli(p_hat, q) <= threshold + 1e-3,
            "kl({p_hat}, {q}) = {} overshoots {threshold}",
            kl_bernoulli(p_hat, q)
        );
    }

    #[test]
    fn kl_inverse_converges_for_extreme_means() {
        for p_hat in [0.0, 0.5, 1.0] {
            let q = kl_upper_inverse(p_hat, 0.5);
            assert!((p_hat..=1.0).contains(&q));
            if q < 1.0 {
                assert!(kl_bernoulli(p_hat, q) <= 0.5 + 1e-3);
            }
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn kl_inverse_stays_in_range_and_under_threshold(
                p_hat in 0.0f64..=1.0,
                threshold in 0.0f64..5.0,
            ) {
                let q = kl_upper_inverse(p_hat, threshold);
                prop_assert!(q >= p_hat - 1e-9);
                prop_assert!(q <= 1.0 + 1e-9);
                if q < 1.0 {
                    prop_assert!(kl_bernoulli(p_hat, q) <= threshold + 1e-3);
                }
            }
        }
    }

    #[test]
    fn kl_ucb_prefers_unseen_arm() {
        let mut state = KlUcbState {
            c: 0.0,
            reward_sum: vec![0.0; 3],
            pulls: vec![0; 3],
            round: 0,
        };
        for _ in 0..20 {
            update_kl_ucb(&mut state, 0, 1.0);
            update_kl_ucb(&mut state, 1, 0.0);
        }
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(select_kl_ucb(&state, false, &mut rng), 2);
        assert_eq!(select_kl_ucb(&state, true, &mut rng), 2);
    }

    #[test]
    fn kl_ucb_bound_grows_with_round() {
        let state_small = KlUcbState {
            c: 0.0,
            reward_sum: vec![5.0],
            pulls: vec![10],
            round: 10,
        };
        let state_large = KlUcbState {
            round: 10_000,
            ..state_small.clone()
        };
        let small = kl_ucb_bound(&state_small, 0, false);
        let large = kl_ucb_bound(&state_large, 0, false);
        assert!(large > small, "more rounds should widen the bound");
        assert!(small >= 0.5, "bound must sit above the empirical mean");
    }
}
