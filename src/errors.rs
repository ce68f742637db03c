use thiserror::Error;

/// Token validation errors, surfaced separately so the feedback boundary can
/// distinguish "reject and log" cases from transient failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature or payload verification failed
    #[error("invalid token: {0}")]
    Invalid(String),
    /// Token is past its validity window
    #[error("token expired ({age_ms}ms > {max_age_ms}ms)")]
    Expired { age_ms: i64, max_age_ms: i64 },
}

/// Main engine error type.
#[derive(Error, Debug, Clone)]
pub enum BanditError {
    /// Bad input shape — caller bug, never retried
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// No parameter state exists for the pool; caller must initialize the
    /// experiment before selecting
    #[error("no parameter state for pool {pool_id}")]
    StateUnavailable { pool_id: String },

    /// Selection requested against a pool with zero arms
    #[error("pool {pool_id} has no arms")]
    PoolEmpty { pool_id: String },

    /// Feedback token rejected
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Reward value does not match the algorithm family's reward kind
    #[error("reward {reward} is not valid for {family} (expects {expected})")]
    RewardTypeMismatch {
        family: String,
        expected: String,
        reward: f64,
    },

    /// Durable write raced with a newer version (trainer handover window);
    /// automatically retried from a fresh read
    #[error("stale write for {key}: expected version {expected}, store has {actual}")]
    StaleWrite {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Transient storage or log failure
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// State or token payload failed to (de)serialize
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BanditError {
    /// Create a contract violation error.
    pub fn contract(msg: impl Into<String>) -> Self {
        BanditError::ContractViolation(msg.into())
    }

    /// Create a transient backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        BanditError::BackendUnavailable(msg.into())
    }

    /// Whether the trainer should retry the operation that produced this
    /// error (transient), as opposed to logging and skipping (malformed).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BanditError::StaleWrite { .. } | BanditError::BackendUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for BanditError {
    fn from(e: serde_json::Error) -> Self {
        BanditError::Serialization(e.to_string())
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BanditError>;
