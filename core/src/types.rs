//! Shared primitive types used across the crate.

/// Identifier of one configured retention offer.
pub type ArmId = String;

/// An independent customer organization. Each tenant owns one bandit.
pub type TenantId = String;

/// Wall-clock timestamps are always UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
