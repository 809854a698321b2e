//! Retention offer bandit: picks a retention offer for each cancellation
//! attempt and learns from how users respond, independently per tenant.

pub mod arm;
pub mod bandit;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub mod reward;
pub mod rng;
pub mod snapshot;
pub mod store;
pub mod types;

pub use arm::{Arm, ArmSet, OfferCategory};
pub use bandit::{Choice, OfferBandit, UpdateOutcome};
pub use config::{BanditParams, RetentionConfig};
pub use engine::{OfferPresentation, OutcomeReceipt, OutcomeStatus, RetentionEngine};
pub use error::{BanditError, BanditResult};
pub use reward::{calculate_reward, Feedback, UserResponse};
pub use snapshot::{BanditSnapshot, LoadReport};
pub use store::{MemoryStore, SnapshotStore, SqliteStore};
