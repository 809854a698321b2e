//! Synthetic cancellation traffic for batch runs.
//!
//! Each tenant gets a hidden customer population: a per-arm acceptance
//! probability drawn once from the tenant's RNG. Generous offers are
//! accepted more often, but not always enough to pay for their cost.

use retention_core::{
    arm::{Arm, OfferCategory},
    reward::UserResponse,
    rng::TenantRng,
    ArmSet,
};

/// Share of non-accepting users who close the dialog without answering.
const IGNORE_SHARE: f64 = 0.3;

pub struct SyntheticPopulation {
    accept_probability: Vec<(String, f64)>,
    rng:                TenantRng,
}

impl SyntheticPopulation {
    pub fn new(arms: &ArmSet, master_seed: u64, tenant_id: &str) -> Self {
        // Separate stream from the bandit's own exploration RNG.
        let mut rng = TenantRng::for_tenant(master_seed ^ 0x5EED_F00D, tenant_id);
        let accept_probability = arms
            .iter()
            .map(|arm| {
                let jitter = 0.75 + 0.5 * rng.next_f64();
                (arm.id.clone(), (base_acceptance(arm) * jitter).clamp(0.0, 0.95))
            })
            .collect();
        Self { accept_probability, rng }
    }

    pub fn acceptance(&self, arm_id: &str) -> f64 {
        self.accept_probability
            .iter()
            .find(|(id, _)| id == arm_id)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }

    /// Draw one user's reaction to `arm`.
    pub fn respond(&mut self, arm: &Arm) -> UserResponse {
        if self.rng.chance(self.acceptance(&arm.id)) {
            UserResponse::Accepted
        } else if self.rng.chance(IGNORE_SHARE) {
            UserResponse::Ignored
        } else {
            UserResponse::Declined
        }
    }

    /// Monthly recurring revenue of the cancelling account, in dollars.
    pub fn mrr(&mut self) -> f64 {
        (20.0 + 180.0 * self.rng.next_f64()).round()
    }
}

fn base_acceptance(arm: &Arm) -> f64 {
    match arm.category {
        OfferCategory::Discount       => 0.10 + 0.6 * arm.cost_fraction,
        OfferCategory::Pause          => 0.20 + 0.4 * arm.cost_fraction,
        OfferCategory::PlanSwap       => 0.25,
        OfferCategory::TrialExtension => 0.12,
    }
}
