//! Offer bandit: epsilon-greedy value learning over a fixed arm set.
//!
//! Lifecycle:
//!   configured (all estimates 0) → warmed up with N updates
//!
//! RULES:
//!   - Values and counts are index-aligned with the ArmSet, so every
//!     configured arm always has exactly one estimate and one count.
//!   - select_action() never records anything; only update() does.
//!   - Greedy ties resolve to the first arm in catalog order.
//!   - Counts only grow, except through an explicit load_state().

use crate::{
    arm::{Arm, ArmSet},
    config::BanditParams,
    error::{BanditError, BanditResult},
    metrics::{safe_ratio, ArmMetrics, BanditMetrics},
    reward::{calculate_reward, Feedback, UserResponse},
    rng::TenantRng,
    snapshot::{BanditSnapshot, LoadReport},
    types::Timestamp,
};

/// Result of one selection, with the policy branch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub index:    usize,
    pub explored: bool,
}

/// What update() did. Unknown arms and non-finite rewards leave state untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub enum UpdateOutcome {
    Applied {
        index:        usize,
        new_estimate: f64,
        count:        u64,
    },
    UnknownArm,
    NonFiniteReward,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct OfferBandit {
    arms:              ArmSet,
    params:            BanditParams,
    values:            Vec<f64>,
    counts:            Vec<u64>,
    cumulative_reward: f64,
    epsilon:           f64,
    last_updated:      Option<Timestamp>,
    rng:               TenantRng,
}

impl OfferBandit {
    pub fn new(arms: ArmSet, params: BanditParams, rng: TenantRng) -> BanditResult<Self> {
        params.validate()?;
        let n = arms.len();
        Ok(Self {
            epsilon: params.epsilon,
            arms,
            params,
            values: vec![0.0; n],
            counts: vec![0; n],
            cumulative_reward: 0.0,
            last_updated: None,
            rng,
        })
    }

    /// Build from a raw arm list. Fails on an empty or invalid catalog.
    pub fn from_arms(arms: Vec<Arm>, params: BanditParams, seed: u64) -> BanditResult<Self> {
        Self::new(ArmSet::new(arms)?, params, TenantRng::from_seed(seed))
    }

    // ── Selection ──────────────────────────────────────────────

    /// Epsilon-greedy choice. Only advances the RNG.
    pub fn choose(&mut self) -> Choice {
        if self.rng.chance(self.epsilon) {
            let index = self.rng.next_u64_below(self.arms.len() as u64) as usize;
            Choice { index, explored: true }
        } else {
            Choice { index: self.greedy_index(), explored: false }
        }
    }

    pub fn select_action(&mut self) -> &Arm {
        let choice = self.choose();
        self.arms.at(choice.index)
    }

    fn greedy_index(&self) -> usize {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate().skip(1) {
            if *v > self.values[best] {
                best = i;
            }
        }
        best
    }

    // ── Learning ───────────────────────────────────────────────

    /// Reward for an outcome under this bandit's parameters. The arm id is
    /// not validated here; update() does that.
    pub fn calculate_reward(
        &self,
        _arm_id: &str,
        response: UserResponse,
        mrr_value: f64,
        cost_fraction: f64,
    ) -> f64 {
        calculate_reward(&self.params, response, mrr_value, cost_fraction)
    }

    /// Reward for feedback using the configured cost of its arm.
    /// None when the arm is not configured.
    pub fn reward_for(&self, feedback: &Feedback) -> Option<f64> {
        let arm = self.arms.get(&feedback.arm_id)?;
        Some(calculate_reward(
            &self.params,
            feedback.response,
            feedback.mrr_value,
            arm.cost_fraction,
        ))
    }

    pub fn update(&mut self, arm_id: &str, reward: f64) -> UpdateOutcome {
        self.update_at(arm_id, reward, chrono::Utc::now())
    }

    /// Running-average update with an explicit timestamp.
    pub fn update_at(&mut self, arm_id: &str, reward: f64, now: Timestamp) -> UpdateOutcome {
        let Some(index) = self.arms.index_of(arm_id) else {
            log::warn!("bandit: update for unknown arm '{arm_id}' ignored");
            return UpdateOutcome::UnknownArm;
        };
        if !reward.is_finite() {
            log::warn!("bandit: non-finite reward {reward} for '{arm_id}' ignored");
            return UpdateOutcome::NonFiniteReward;
        }

        let old = self.values[index];
        let new_estimate = old + self.params.alpha * (reward - old);
        self.values[index] = new_estimate;
        self.counts[index] += 1;
        self.cumulative_reward += reward;
        self.last_updated = Some(now);

        log::debug!(
            "bandit: {arm_id} reward={reward:.4} estimate {old:.4} -> {new_estimate:.4} (n={})",
            self.counts[index]
        );

        UpdateOutcome::Applied {
            index,
            new_estimate,
            count: self.counts[index],
        }
    }

    /// Multiply epsilon by `decay_rate`, never going below the floor.
    /// An epsilon already under the floor is left where it is.
    pub fn decay_epsilon(&mut self, decay_rate: f64) -> f64 {
        if !decay_rate.is_finite() || decay_rate < 0.0 {
            log::warn!("bandit: invalid decay rate {decay_rate} ignored");
            return self.epsilon;
        }
        let floor = self.params.epsilon_floor.min(self.epsilon);
        self.epsilon = (self.epsilon * decay_rate).clamp(floor, 1.0);
        self.epsilon
    }

    // ── Reporting ──────────────────────────────────────────────

    pub fn get_metrics(&self) -> BanditMetrics {
        let total_selections: u64 = self.counts.iter().sum();
        let arms = self
            .arms
            .iter()
            .zip(self.values.iter().zip(&self.counts))
            .map(|(arm, (&value_estimate, &count))| ArmMetrics {
                arm_id: arm.id.clone(),
                category: arm.category,
                value_estimate,
                count,
                average_reward: safe_ratio(value_estimate, count as f64),
            })
            .collect();

        BanditMetrics {
            total_selections,
            average_reward: safe_ratio(self.cumulative_reward, total_selections as f64),
            epsilon: self.epsilon,
            arms,
        }
    }

    // ── Persistence ────────────────────────────────────────────

    pub fn get_state(&self) -> BanditSnapshot {
        let ids: Vec<String> = self.arms.ids().map(str::to_string).collect();
        BanditSnapshot {
            values: ids.iter().cloned().zip(self.values.iter().copied()).collect(),
            counts: ids.into_iter().zip(self.counts.iter().copied()).collect(),
            cumulative_reward: self.cumulative_reward,
            epsilon: self.epsilon,
            last_updated: self.last_updated,
        }
    }

    /// Replace learning state from a snapshot. Entries for arms that are not
    /// configured are dropped; configured arms missing from the snapshot
    /// restart at zero.
    pub fn load_state(&mut self, snapshot: &BanditSnapshot) -> LoadReport {
        let report = self.reconcile(snapshot);

        for (i, arm) in self.arms.iter().enumerate() {
            self.values[i] = snapshot
                .values
                .get(&arm.id)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0);
            self.counts[i] = snapshot.counts.get(&arm.id).copied().unwrap_or(0);
        }
        self.cumulative_reward = if snapshot.cumulative_reward.is_finite() {
            snapshot.cumulative_reward
        } else {
            0.0
        };
        if snapshot.epsilon.is_finite() {
            self.epsilon = snapshot.epsilon.clamp(0.0, 1.0);
        }
        self.last_updated = snapshot.last_updated;

        if !report.is_exact() {
            log::warn!(
                "bandit: snapshot reconciled (dropped={:?}, missing={:?})",
                report.dropped,
                report.missing
            );
        }
        report
    }

    /// Like load_state(), but refuses any snapshot whose arm ids differ
    /// from the configured set. State is untouched on error.
    pub fn load_state_strict(&mut self, snapshot: &BanditSnapshot) -> BanditResult<()> {
        let report = self.reconcile(snapshot);
        if !report.is_exact() {
            return Err(BanditError::SnapshotMismatch {
                unknown: report.dropped,
                missing: report.missing,
            });
        }
        let _ = self.load_state(snapshot);
        Ok(())
    }

    fn reconcile(&self, snapshot: &BanditSnapshot) -> LoadReport {
        let mut dropped: Vec<String> = snapshot
            .values
            .keys()
            .chain(snapshot.counts.keys())
            .filter(|id| self.arms.index_of(id).is_none())
            .cloned()
            .collect();
        dropped.sort();
        dropped.dedup();

        let missing = self
            .arms
            .ids()
            .filter(|id| !snapshot.values.contains_key(*id) || !snapshot.counts.contains_key(*id))
            .map(str::to_string)
            .collect();

        LoadReport { dropped, missing }
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn arms(&self) -> &ArmSet {
        &self.arms
    }

    pub fn params(&self) -> &BanditParams {
        &self.params
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn cumulative_reward(&self) -> f64 {
        self.cumulative_reward
    }

    pub fn last_updated(&self) -> Option<Timestamp> {
        self.last_updated
    }

    pub fn value_estimate(&self, arm_id: &str) -> Option<f64> {
        self.arms.index_of(arm_id).map(|i| self.values[i])
    }

    pub fn count(&self, arm_id: &str) -> Option<u64> {
        self.arms.index_of(arm_id).map(|i| self.counts[i])
    }

    pub fn total_selections(&self) -> u64 {
        self.counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::OfferCategory;

    fn two_arm_bandit(epsilon: f64) -> OfferBandit {
        let arms = vec![
            Arm::new("A", OfferCategory::Discount, 10.0, 0.1, "ten off"),
            Arm::new("B", OfferCategory::Pause, 30.0, 0.5, "pause"),
        ];
        let params = BanditParams { epsilon, ..Default::default() };
        OfferBandit::from_arms(arms, params, 1).unwrap()
    }

    #[test]
    fn empty_catalog_fails_construction() {
        let err = OfferBandit::from_arms(vec![], BanditParams::default(), 1).unwrap_err();
        assert!(matches!(err, BanditError::EmptyArmSet));
    }

    #[test]
    fn greedy_tie_picks_first_arm() {
        let mut bandit = two_arm_bandit(0.0);
        for _ in 0..50 {
            assert_eq!(bandit.select_action().id, "A");
        }
    }

    #[test]
    fn greedy_follows_best_estimate() {
        let mut bandit = two_arm_bandit(0.0);
        let _ = bandit.update("B", 0.5);
        assert_eq!(bandit.select_action().id, "B");
    }

    #[test]
    fn selection_has_no_side_effects_on_learning_state() {
        let mut bandit = two_arm_bandit(0.5);
        let before = bandit.get_state();
        for _ in 0..100 {
            bandit.select_action();
        }
        assert_eq!(bandit.get_state(), before);
    }

    #[test]
    fn update_moves_estimate_by_alpha() {
        let mut bandit = two_arm_bandit(0.1);
        let outcome = bandit.update("A", 1.0);
        assert_eq!(outcome, UpdateOutcome::Applied { index: 0, new_estimate: 0.1, count: 1 });
        let outcome = bandit.update("A", 1.0);
        match outcome {
            UpdateOutcome::Applied { new_estimate, count, .. } => {
                assert!((new_estimate - 0.19).abs() < 1e-12);
                assert_eq!(count, 2);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(bandit.cumulative_reward(), 2.0);
        assert!(bandit.last_updated().is_some());
    }

    #[test]
    fn unknown_arm_leaves_state_unchanged() {
        let mut bandit = two_arm_bandit(0.1);
        let _ = bandit.update("A", 0.4);
        let before = bandit.get_state();
        assert_eq!(bandit.update("nope", 1.0), UpdateOutcome::UnknownArm);
        assert_eq!(bandit.get_state(), before);
    }

    #[test]
    fn non_finite_reward_ignored() {
        let mut bandit = two_arm_bandit(0.1);
        assert_eq!(bandit.update("A", f64::NAN), UpdateOutcome::NonFiniteReward);
        assert_eq!(bandit.count("A"), Some(0));
    }

    #[test]
    fn metrics_guard_division_by_zero() {
        let bandit = two_arm_bandit(0.1);
        let m = bandit.get_metrics();
        assert_eq!(m.total_selections, 0);
        assert_eq!(m.average_reward, 0.0);
        assert!(m.arms.iter().all(|a| a.average_reward == 0.0));
    }

    #[test]
    fn metrics_report_per_arm_breakdown() {
        let mut bandit = two_arm_bandit(0.1);
        let _ = bandit.update("A", 1.0);
        let _ = bandit.update("A", 0.0);
        let _ = bandit.update("B", -0.15);
        let m = bandit.get_metrics();
        assert_eq!(m.total_selections, 3);
        assert!((m.average_reward - (0.85 / 3.0)).abs() < 1e-12);
        assert_eq!(m.arms[0].arm_id, "A");
        assert_eq!(m.arms[0].category, OfferCategory::Discount);
        assert_eq!(m.arms[0].count, 2);
        assert!((m.arms[0].average_reward - m.arms[0].value_estimate / 2.0).abs() < 1e-12);
        assert_eq!(m.best_arm().unwrap().arm_id, "A");
    }

    #[test]
    fn decay_respects_floor() {
        let mut bandit = two_arm_bandit(0.1);
        assert!((bandit.decay_epsilon(0.99) - 0.099).abs() < 1e-12);
        for _ in 0..100 {
            bandit.decay_epsilon(0.5);
        }
        assert_eq!(bandit.epsilon(), 0.01);
    }

    #[test]
    fn decay_never_raises_epsilon_below_floor() {
        let mut bandit = two_arm_bandit(0.0);
        assert_eq!(bandit.decay_epsilon(0.5), 0.0);
    }

    #[test]
    fn invalid_decay_rate_leaves_epsilon() {
        let mut bandit = two_arm_bandit(0.2);
        for rate in [-0.5, f64::NAN, f64::INFINITY] {
            assert_eq!(bandit.decay_epsilon(rate), 0.2);
        }
        assert_eq!(bandit.epsilon(), 0.2);
    }

    #[test]
    fn load_state_discards_non_finite_numbers() {
        let mut bandit = two_arm_bandit(0.1);
        let mut snap = bandit.get_state();
        snap.values.insert("A".into(), f64::NAN);
        snap.values.insert("B".into(), 0.3);
        snap.counts.insert("B".into(), 4);
        snap.cumulative_reward = f64::INFINITY;
        snap.epsilon = 1.7;

        let report = bandit.load_state(&snap);

        assert!(report.is_exact());
        assert_eq!(bandit.value_estimate("A"), Some(0.0));
        assert_eq!(bandit.value_estimate("B"), Some(0.3));
        assert_eq!(bandit.count("B"), Some(4));
        assert_eq!(bandit.cumulative_reward(), 0.0);
        assert_eq!(bandit.epsilon(), 1.0);

        snap.epsilon = f64::NAN;
        let _ = bandit.load_state(&snap);
        assert_eq!(bandit.epsilon(), 1.0);
    }

    #[test]
    fn state_snapshot_is_independent() {
        let mut bandit = two_arm_bandit(0.1);
        let _ = bandit.update("A", 1.0);
        let mut snap = bandit.get_state();
        snap.values.insert("A".into(), 99.0);
        snap.counts.insert("A".into(), 99);
        assert_eq!(bandit.value_estimate("A"), Some(0.1));
        assert_eq!(bandit.count("A"), Some(1));
    }

    #[test]
    fn reward_for_uses_configured_cost() {
        let bandit = two_arm_bandit(0.1);
        let declined = Feedback::new("B", UserResponse::Declined, 100.0);
        let r = bandit.reward_for(&declined).unwrap();
        assert!((r + 0.15).abs() < 1e-12);
        assert!(bandit.reward_for(&Feedback::new("Z", UserResponse::Accepted, 1.0)).is_none());
    }
}
