//! Snapshot serialization: bandit learning state to/from JSON.
//!
//! A snapshot is the only artifact that crosses the persistence
//! boundary. It is keyed by arm id so it stays readable when the
//! catalog order changes.

use crate::types::{ArmId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditSnapshot {
    pub values:            BTreeMap<ArmId, f64>,
    pub counts:            BTreeMap<ArmId, u64>,
    pub cumulative_reward: f64,
    pub epsilon:           f64,
    pub last_updated:      Option<Timestamp>,
}

impl BanditSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// How a snapshot was reconciled against the configured arm set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadReport {
    /// In the snapshot but not configured. Discarded.
    pub dropped: Vec<ArmId>,
    /// Configured but absent from the snapshot. Started at zero.
    pub missing: Vec<ArmId>,
}

impl LoadReport {
    pub fn is_exact(&self) -> bool {
        self.dropped.is_empty() && self.missing.is_empty()
    }
}
