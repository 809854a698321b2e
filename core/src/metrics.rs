//! Read-only reporting views over a bandit's state.

use crate::{arm::OfferCategory, types::ArmId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmMetrics {
    pub arm_id:         ArmId,
    pub category:       OfferCategory,
    pub value_estimate: f64,
    pub count:          u64,
    /// value_estimate / count, 0 when the arm was never updated.
    pub average_reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditMetrics {
    pub total_selections: u64,
    /// cumulative_reward / total_selections, 0 before the first update.
    pub average_reward:   f64,
    pub epsilon:          f64,
    pub arms:             Vec<ArmMetrics>,
}

impl BanditMetrics {
    /// Arm with the highest value estimate; first in catalog order on ties.
    pub fn best_arm(&self) -> Option<&ArmMetrics> {
        self.arms.iter().fold(None, |best: Option<&ArmMetrics>, m| match best {
            Some(b) if b.value_estimate >= m.value_estimate => Some(b),
            _ => Some(m),
        })
    }
}

/// Ratio that resolves to 0 when the denominator is 0.
pub(crate) fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
