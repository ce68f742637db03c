#![deny(unreachable_pub)]

//! Multi-armed bandit decision engine.
//!
//! The read path ([`Agent::select`]) serves decisions from cached parameter
//! state and mints a signed token per decision. Rewards come back through
//! [`Agent::train`], land on a [`FeedbackLog`], and are folded into durable
//! state by the single-writer [`Trainer`]. Twelve algorithm families share
//! one state representation ([`ParamState`]) and one storage plane.

// Core modules
mod agent;
mod config;
mod errors;
mod types;

// Decision and storage planes
pub mod backend;
pub mod feedback;
pub mod policy;
mod token;
mod trainer;

// Re-exports
pub use agent::{apply_feedback, Agent, InitOutcome, Selection, TrainAck};
pub use backend::{DurableParamStore, InMemoryParamStore, ParamBackend, StateKey, VersionedState};
pub use config::{CacheConfig, EngineConfig, TokenConfig, TrainerConfig};
pub use errors::{BanditError, Result, TokenError};
pub use feedback::{FeedbackEvent, FeedbackLog, InMemoryFeedbackLog};
pub use policy::{AlgorithmFamily, ParamState, PolicyInit};
pub use token::{TokenClaims, TokenCodec};
pub use trainer::{StatsSnapshot, Trainer, TrainerHandle, TrainerStats};
pub use types::{Arm, Context, ExperimentDescriptor, Pool, RewardKind};
