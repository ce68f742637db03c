//! Core data model: pools, arms, contexts, and experiment descriptors.
//!
//! Everything here is already-validated metadata handed in from the outer
//! service layer (CRUD, auth, and tenant resolution live outside this crate).

use serde::{Deserialize, Serialize};

use crate::errors::{BanditError, Result};
use crate::policy::AlgorithmFamily;

/// One selectable option in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arm {
    /// Stable external identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl Arm {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Ordered, fixed-size set of arms under one experiment.
///
/// Arm count is pinned once the experiment starts; changing the set of arms
/// means a new pool and a new experiment, never a mutation of state shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub arms: Vec<Arm>,
}

impl Pool {
    pub fn new(id: impl Into<String>, arms: Vec<Arm>) -> Self {
        Self {
            id: id.into(),
            arms,
        }
    }

    /// Number of arms `k`.
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Arm at `index`, or a contract violation if out of range.
    pub fn arm(&self, index: usize) -> Result<&Arm> {
        self.arms.get(index).ok_or_else(|| {
            BanditError::contract(format!(
                "arm index {index} out of range for pool {} (k = {})",
                self.id,
                self.arms.len()
            ))
        })
    }
}

/// Request context for one selection.
///
/// The feature vector is only consulted by the contextual families (LinUCB,
/// LinTS); stochastic and adversarial families ignore it entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Fixed-length numeric feature vector (may be empty for
    /// non-contextual families)
    #[serde(default)]
    pub vector: Vec<f64>,
}

impl Context {
    pub fn new(vector: Vec<f64>) -> Self {
        Self { vector }
    }

    /// Context with no features.
    pub fn empty() -> Self {
        Self { vector: Vec::new() }
    }
}

/// Which reward values an algorithm family accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// Exactly 0.0 or 1.0
    Binary,
    /// Any finite real value
    Real,
}

impl std::fmt::Display for RewardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewardKind::Binary => write!(f, "binary 0/1"),
            RewardKind::Real => write!(f, "finite real"),
        }
    }
}

impl RewardKind {
    /// Validate a reward value against this kind.
    pub fn validate(self, family: AlgorithmFamily, reward: f64) -> Result<()> {
        let ok = match self {
            RewardKind::Binary => reward == 0.0 || reward == 1.0,
            RewardKind::Real => reward.is_finite(),
        };
        if ok {
            Ok(())
        } else {
            Err(BanditError::RewardTypeMismatch {
                family: family.to_string(),
                expected: self.to_string(),
                reward,
            })
        }
    }
}

/// Already-validated experiment metadata, delivered from the external
/// metadata store when an experiment starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    pub experiment_id: String,
    pub tenant_id: String,
    pub pool: Pool,
    pub family: AlgorithmFamily,
    /// Priors and hyperparameters for the initial parameter state
    #[serde(default)]
    pub init: crate::policy::PolicyInit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_arm_lookup() {
        let pool = Pool::new("p1", vec![Arm::new("a", "A"), Arm::new("b", "B")]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.arm(1).unwrap().id, "b");
        assert!(pool.arm(2).is_err());
    }

    #[test]
    fn binary_reward_validation() {
        let kind = RewardKind::Binary;
        assert!(kind.validate(AlgorithmFamily::BetaTs, 1.0).is_ok());
        assert!(kind.validate(AlgorithmFamily::BetaTs, 0.0).is_ok());
        assert!(kind.validate(AlgorithmFamily::BetaTs, 0.5).is_err());
        assert!(kind.validate(AlgorithmFamily::BetaTs, f64::NAN).is_err());
    }

    #[test]
    fn real_reward_validation() {
        let kind = RewardKind::Real;
        assert!(kind.validate(AlgorithmFamily::Moss, -3.25).is_ok());
        assert!(kind.validate(AlgorithmFamily::Moss, f64::INFINITY).is_err());
    }
}
