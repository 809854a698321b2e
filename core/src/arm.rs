//! Arm catalog: the fixed set of retention offers a bandit chooses from.
//!
//! Arms are defined once at startup and never mutated. The order of the
//! catalog is the tie-break order used by greedy selection.

use crate::{
    error::{BanditError, BanditResult},
    types::ArmId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OfferCategory {
    Discount,       // magnitude = percent off
    Pause,          // magnitude = days paused
    PlanSwap,       // magnitude = target plan tier
    TrialExtension, // magnitude = extra days
}

impl OfferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discount       => "discount",
            Self::Pause          => "pause",
            Self::PlanSwap       => "plan_swap",
            Self::TrialExtension => "trial_extension",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Arm {
    pub id:            ArmId,
    pub category:      OfferCategory,
    pub magnitude:     f64,
    /// Fraction of value given away, in [0, 1].
    pub cost_fraction: f64,
    pub description:   String,
}

impl Arm {
    pub fn new(
        id: impl Into<ArmId>,
        category: OfferCategory,
        magnitude: f64,
        cost_fraction: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            magnitude,
            cost_fraction,
            description: description.into(),
        }
    }

    fn validate(&self) -> BanditResult<()> {
        let invalid = |reason: &str| BanditError::InvalidArm {
            arm_id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if !self.magnitude.is_finite() {
            return Err(invalid("magnitude must be finite"));
        }
        if !(0.0..=1.0).contains(&self.cost_fraction) {
            return Err(invalid("cost_fraction must be within [0, 1]"));
        }
        Ok(())
    }
}

/// A validated, ordered, non-empty list of arms with unique ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmSet {
    arms: Vec<Arm>,
}

impl ArmSet {
    pub fn new(arms: Vec<Arm>) -> BanditResult<Self> {
        if arms.is_empty() {
            return Err(BanditError::EmptyArmSet);
        }
        for (i, arm) in arms.iter().enumerate() {
            arm.validate()?;
            if arms[..i].iter().any(|prev| prev.id == arm.id) {
                return Err(BanditError::InvalidArm {
                    arm_id: arm.id.clone(),
                    reason: "duplicate id".to_string(),
                });
            }
        }
        Ok(Self { arms })
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// Always false for a constructed set; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn index_of(&self, arm_id: &str) -> Option<usize> {
        self.arms.iter().position(|a| a.id == arm_id)
    }

    pub fn get(&self, arm_id: &str) -> Option<&Arm> {
        self.arms.iter().find(|a| a.id == arm_id)
    }

    pub fn at(&self, index: usize) -> &Arm {
        &self.arms[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arm> {
        self.arms.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.arms.iter().map(|a| a.id.as_str())
    }

    pub fn as_slice(&self) -> &[Arm] {
        &self.arms
    }
}

impl<'a> IntoIterator for &'a ArmSet {
    type Item = &'a Arm;
    type IntoIter = std::slice::Iter<'a, Arm>;

    fn into_iter(self) -> Self::IntoIter {
        self.arms.iter()
    }
}

/// The built-in retention catalog shipped in data/arms/arm_catalog.json.
pub fn default_catalog() -> Vec<Arm> {
    use OfferCategory::*;
    vec![
        Arm::new("discount_10", Discount, 10.0, 0.10, "10% off the next three months"),
        Arm::new("discount_25", Discount, 25.0, 0.25, "25% off the next three months"),
        Arm::new("discount_50", Discount, 50.0, 0.50, "50% off the next month"),
        Arm::new("pause_30", Pause, 30.0, 0.15, "Pause the subscription for one month"),
        Arm::new("pause_60", Pause, 60.0, 0.30, "Pause the subscription for two months"),
        Arm::new("plan_swap_down", PlanSwap, 1.0, 0.35, "Switch to the next plan down"),
        Arm::new("trial_ext_14", TrialExtension, 14.0, 0.05, "Fourteen extra days on the current plan"),
    ]
}
