//! Contextual family: LinUCB and linear Thompson Sampling.
//!
//! Both keep per-arm ridge-regression sufficient statistics: a design
//! matrix `A = lambda*I + sum(x x^T)` and a reward-weighted context sum
//! `b = sum(r x)`. The point estimate is `theta = A^-1 b`.

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::errors::{BanditError, Result};
use crate::types::Context;

use super::argmax_tiebreak;
use super::state::{LinTsState, LinUcbState};

/// Validate the request context against the configured feature dimension.
pub(super) fn context_vector(dim: usize, context: &Context) -> Result<DVector<f64>> {
    if context.vector.len() != dim {
        return Err(BanditError::contract(format!(
            "context dimension {} does not match configured dimension {dim}",
            context.vector.len()
        )));
    }
    Ok(DVector::from_column_slice(&context.vector))
}

fn inverse(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    Cholesky::new(a.clone()).map(|c| c.inverse())
}

/// LinUCB score: `theta^T x + alpha * sqrt(x^T A^-1 x)`.
///
/// An arm whose design matrix fails to factor scores infinite, the same
/// treatment unseen arms get in the index policies.
pub(super) fn select_lin_ucb<R: Rng>(
    state: &LinUcbState,
    context: &Context,
    rng: &mut R,
) -> Result<usize> {
    let x = context_vector(state.dim, context)?;
    let mut scores = Vec::with_capacity(state.a.len());
    for (a, b) in state.a.iter().zip(&state.b) {
        let score = match inverse(a) {
            Some(a_inv) => {
                let theta = &a_inv * b;
                let width = (x.dot(&(&a_inv * &x))).max(0.0).sqrt();
                theta.dot(&x) + state.alpha * width
            }
            None => f64::INFINITY,
        };
        scores.push(score);
    }
    argmax_tiebreak(&scores, rng)
        .ok_or_else(|| BanditError::contract("select on empty lin_ucb state"))
}

/// Linear TS score: sample `theta ~ N(A^-1 b, v^2 A^-1)` and project onto x.
pub(super) fn select_lin_ts<R: Rng>(
    state: &LinTsState,
    context: &Context,
    rng: &mut R,
) -> Result<usize> {
    let x = context_vector(state.dim, context)?;
    let mut scores = Vec::with_capacity(state.a.len());
    for (a, b) in state.a.iter().zip(&state.b) {
        let score = match inverse(a) {
            Some(a_inv) => {
                let theta_hat = &a_inv * b;
                let cov = &a_inv * (state.v * state.v);
                // Symmetrize before factoring; accumulated float error can
                // leave the product fractionally asymmetric.
                let sym = (&cov + cov.transpose()) * 0.5;
                let theta = match Cholesky::new(sym) {
                    Some(chol) => {
                        let z = DVector::from_fn(state.dim, |_, _| {
                            StandardNormal.sample(rng)
                        });
                        &theta_hat + chol.l() * z
                    }
                    None => theta_hat,
                };
                theta.dot(&x)
            }
            None => 0.0,
        };
        scores.push(score);
    }
    argmax_tiebreak(&scores, rng)
        .ok_or_else(|| BanditError::contract("select on empty lin_ts state"))
}

/// Rank-one ridge update shared by both contextual families.
pub(super) fn update_linear(
    a: &mut [DMatrix<f64>],
    b: &mut [DVector<f64>],
    arm: usize,
    reward: f64,
    x: &DVector<f64>,
) {
    a[arm] += x * x.transpose();
    b[arm] += x * reward;
}
