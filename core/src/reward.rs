//! Reward shaping: translates a business outcome into a bounded learning signal.
//!
//!   accepted → mrr × (1 − cost)
//!   declined → declined_reward (small negative constant)
//!   ignored  → 0
//!
//! then every response pays cost × cost_penalty_weight, and the result
//! is clamped into [−reward_bound, reward_bound].

use crate::{config::BanditParams, types::ArmId};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserResponse {
    Accepted,
    Declined,
    Ignored,
}

impl UserResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Ignored  => "ignored",
        }
    }
}

impl fmt::Display for UserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "ignored"  => Ok(Self::Ignored),
            other      => Err(format!("unknown user response '{other}'")),
        }
    }
}

/// An observed user reaction to a presented offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    /// Id handed out with the presentation. Used to drop duplicate deliveries.
    #[serde(default)]
    pub presentation_id: Option<uuid::Uuid>,
    pub arm_id:          ArmId,
    pub response:        UserResponse,
    /// Recurring revenue at stake, non-negative.
    pub mrr_value:       f64,
}

impl Feedback {
    pub fn new(arm_id: impl Into<ArmId>, response: UserResponse, mrr_value: f64) -> Self {
        Self {
            presentation_id: None,
            arm_id: arm_id.into(),
            response,
            mrr_value,
        }
    }

    pub fn for_presentation(mut self, presentation_id: uuid::Uuid) -> Self {
        self.presentation_id = Some(presentation_id);
        self
    }
}

/// Pure reward function. NaN inputs resolve to 0.
pub fn calculate_reward(
    params: &BanditParams,
    response: UserResponse,
    mrr_value: f64,
    cost_fraction: f64,
) -> f64 {
    let base = match response {
        UserResponse::Accepted => mrr_value * (1.0 - cost_fraction),
        UserResponse::Declined => params.declined_reward,
        UserResponse::Ignored  => 0.0,
    };
    let shaped = base - cost_fraction * params.cost_penalty_weight;
    if shaped.is_nan() {
        return 0.0;
    }
    shaped.clamp(-params.reward_bound, params.reward_bound)
}
