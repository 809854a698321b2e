use thiserror::Error;

#[derive(Error, Debug)]
pub enum BanditError {
    #[error("Arm set is empty: a bandit needs at least one offer")]
    EmptyArmSet,

    #[error("Invalid arm '{arm_id}': {reason}")]
    InvalidArm { arm_id: String, reason: String },

    #[error("Invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Invalid feedback: {reason}")]
    InvalidFeedback { reason: String },

    #[error("Snapshot does not match arm set (unknown: {unknown:?}, missing: {missing:?})")]
    SnapshotMismatch {
        unknown: Vec<String>,
        missing: Vec<String>,
    },

    #[error("Version conflict for tenant '{tenant_id}': expected {expected}, found {actual}")]
    VersionConflict {
        tenant_id: String,
        expected:  u64,
        actual:    u64,
    },

    #[error("Outcome for presentation {presentation_id} already recorded for tenant '{tenant_id}'")]
    DuplicateOutcome {
        tenant_id:       String,
        presentation_id: uuid::Uuid,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BanditResult<T> = Result<T, BanditError>;
