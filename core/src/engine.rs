//! The retention engine: per-tenant orchestration of offer bandits.
//!
//! WORK UNIT (one per call, under the tenant's lock):
//!   1. Load the tenant's bandit (store snapshot, or fresh at zero)
//!   2. Select or learn on a private clone
//!   3. Persist the clone with an optimistic version check
//!   4. Swap the clone in only after the store accepted it
//!
//! RULES:
//!   - One bandit per tenant. Tenants never share learning state.
//!   - Mutations for one tenant are serialized by its lock; different
//!     tenants proceed in parallel.
//!   - A version conflict discards the cached bandit so the next call
//!     reloads from the store.
//!   - Every mutation is recorded in the event log. The log is best-effort:
//!     once a commit succeeds the call succeeds, even if the append fails.
//!   - Reads never write. A tenant's load event is held back until the
//!     first write for that tenant.
//!   - The tenant cache only grows; evict() is the way to shrink it.

use crate::{
    arm::{Arm, ArmSet},
    bandit::{OfferBandit, UpdateOutcome},
    config::RetentionConfig,
    error::{BanditError, BanditResult},
    event::{BanditEvent, EventLogEntry, OutcomeRecord},
    metrics::BanditMetrics,
    reward::Feedback,
    rng::TenantRng,
    snapshot::{BanditSnapshot, LoadReport},
    store::SnapshotStore,
    types::{ArmId, TenantId, Timestamp},
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An offer handed to the caller for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPresentation {
    /// Echo this back in Feedback so duplicate deliveries are dropped.
    pub presentation_id: Uuid,
    pub tenant_id:       TenantId,
    pub arm:             Arm,
    pub explored:        bool,
    pub presented_at:    Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    UnknownArm,
    NonFiniteReward,
    Duplicate,
}

impl OutcomeStatus {
    fn from_update(outcome: &UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Applied { .. } => Self::Applied,
            UpdateOutcome::UnknownArm => Self::UnknownArm,
            UpdateOutcome::NonFiniteReward => Self::NonFiniteReward,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeReceipt {
    pub status:       OutcomeStatus,
    pub arm_id:       ArmId,
    pub reward:       Option<f64>,
    pub new_estimate: Option<f64>,
    pub count:        Option<u64>,
    pub epsilon:      f64,
}

impl OutcomeReceipt {
    fn skipped(status: OutcomeStatus, feedback: &Feedback, epsilon: f64) -> Self {
        Self {
            status,
            arm_id: feedback.arm_id.clone(),
            reward: None,
            new_estimate: None,
            count: None,
            epsilon,
        }
    }
}

#[derive(Default)]
struct TenantSlot {
    bandit:  Option<OfferBandit>,
    version: u64,
    /// Load event not yet written to the log.
    pending: Option<BanditEvent>,
}

impl TenantSlot {
    fn invalidate(&mut self) {
        self.bandit = None;
        self.version = 0;
        self.pending = None;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub struct RetentionEngine<S: SnapshotStore> {
    config:  RetentionConfig,
    arms:    ArmSet,
    store:   S,
    tenants: DashMap<TenantId, Arc<Mutex<TenantSlot>>>,
}

impl<S: SnapshotStore> RetentionEngine<S> {
    /// Fails on an empty or invalid arm catalog, or out-of-range parameters.
    pub fn new(config: RetentionConfig, store: S) -> BanditResult<Self> {
        let arms = ArmSet::new(config.arms.clone())?;
        config.params.validate()?;
        log::info!(
            "engine: {} arms, epsilon={}, alpha={}, seed={}",
            arms.len(),
            config.params.epsilon,
            config.params.alpha,
            config.master_seed
        );
        Ok(Self {
            config,
            arms,
            store,
            tenants: DashMap::new(),
        })
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn arms(&self) -> &ArmSet {
        &self.arms
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Tenants with a bandit currently held in memory. Entries stay until
    /// evict() removes them.
    pub fn cached_tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tenants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Operations ─────────────────────────────────────────────

    pub fn select_offer(&self, tenant_id: &str) -> BanditResult<OfferPresentation> {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        let bandit = self.loaded(tenant_id, &mut guard, Access::Write)?;

        let choice = bandit.choose();
        let presentation = OfferPresentation {
            presentation_id: Uuid::new_v4(),
            tenant_id:       tenant_id.to_string(),
            arm:             bandit.arms().at(choice.index).clone(),
            explored:        choice.explored,
            presented_at:    Utc::now(),
        };

        log::debug!(
            "engine: tenant={tenant_id} selected {} (explored={})",
            presentation.arm.id,
            presentation.explored
        );
        self.log_event(tenant_id, &BanditEvent::OfferSelected {
            tenant_id:       tenant_id.to_string(),
            presentation_id: presentation.presentation_id,
            arm_id:          presentation.arm.id.clone(),
            explored:        presentation.explored,
        });

        Ok(presentation)
    }

    /// Learn from one user response. Unknown arms and duplicate deliveries
    /// are reported in the receipt and leave state unchanged.
    pub fn record_outcome(&self, tenant_id: &str, feedback: &Feedback) -> BanditResult<OutcomeReceipt> {
        if !feedback.mrr_value.is_finite() || feedback.mrr_value < 0.0 {
            return Err(BanditError::InvalidFeedback {
                reason: format!("mrr_value must be a non-negative number, got {}", feedback.mrr_value),
            });
        }

        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        let bandit = self.loaded(tenant_id, &mut guard, Access::Write)?;

        let Some(reward) = bandit.reward_for(feedback) else {
            log::warn!("engine: tenant={tenant_id} outcome for unknown arm '{}' ignored", feedback.arm_id);
            let receipt = OutcomeReceipt::skipped(OutcomeStatus::UnknownArm, feedback, bandit.epsilon());
            self.log_event(tenant_id, &BanditEvent::UnknownArmIgnored {
                tenant_id: tenant_id.to_string(),
                arm_id:    feedback.arm_id.clone(),
            });
            return Ok(receipt);
        };

        let mut next = bandit.clone();
        let now = Utc::now();
        let update = next.update_at(&feedback.arm_id, reward, now);
        let UpdateOutcome::Applied { new_estimate, count, .. } = update else {
            let status = OutcomeStatus::from_update(&update);
            return Ok(OutcomeReceipt::skipped(status, feedback, bandit.epsilon()));
        };

        let decayed = self.scheduled_decay(&mut next);

        let record = OutcomeRecord {
            tenant_id:       tenant_id.to_string(),
            presentation_id: feedback.presentation_id,
            arm_id:          feedback.arm_id.clone(),
            response:        feedback.response,
            mrr_value:       feedback.mrr_value,
            reward,
            recorded_at:     now,
        };

        match self.store.commit_outcome(&next.get_state(), guard.version, &record) {
            Ok(version) => guard.version = version,
            Err(BanditError::DuplicateOutcome { presentation_id, .. }) => {
                log::warn!(
                    "engine: tenant={tenant_id} duplicate outcome for presentation {presentation_id} ignored"
                );
                let receipt = OutcomeReceipt::skipped(OutcomeStatus::Duplicate, feedback, next.epsilon());
                self.log_event(tenant_id, &BanditEvent::DuplicateOutcomeIgnored {
                    tenant_id: tenant_id.to_string(),
                    presentation_id,
                });
                return Ok(receipt);
            }
            Err(e) => {
                if matches!(e, BanditError::VersionConflict { .. }) {
                    guard.invalidate();
                }
                return Err(e);
            }
        }

        let epsilon = next.epsilon();
        guard.bandit = Some(next);

        self.log_event(tenant_id, &BanditEvent::OutcomeRecorded {
            tenant_id:       tenant_id.to_string(),
            presentation_id: feedback.presentation_id,
            arm_id:          feedback.arm_id.clone(),
            response:        feedback.response,
            mrr_value:       feedback.mrr_value,
            reward,
            new_estimate,
            count,
        });
        if let Some((from, to)) = decayed {
            self.log_event(tenant_id, &BanditEvent::EpsilonDecayed {
                tenant_id: tenant_id.to_string(),
                from,
                to,
            });
        }

        Ok(OutcomeReceipt {
            status: OutcomeStatus::Applied,
            arm_id: feedback.arm_id.clone(),
            reward: Some(reward),
            new_estimate: Some(new_estimate),
            count: Some(count),
            epsilon,
        })
    }

    pub fn metrics(&self, tenant_id: &str) -> BanditResult<BanditMetrics> {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        Ok(self.loaded(tenant_id, &mut guard, Access::Read)?.get_metrics())
    }

    pub fn snapshot(&self, tenant_id: &str) -> BanditResult<BanditSnapshot> {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        Ok(self.loaded(tenant_id, &mut guard, Access::Read)?.get_state())
    }

    /// Decay the tenant's exploration rate and persist it. Returns the new rate.
    pub fn decay_epsilon(&self, tenant_id: &str, decay_rate: f64) -> BanditResult<f64> {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        let mut next = self.loaded(tenant_id, &mut guard, Access::Write)?.clone();

        let from = next.epsilon();
        let to = next.decay_epsilon(decay_rate);
        self.commit_state(tenant_id, &mut guard, next)?;

        self.log_event(tenant_id, &BanditEvent::EpsilonDecayed {
            tenant_id: tenant_id.to_string(),
            from,
            to,
        });
        Ok(to)
    }

    /// Replace the tenant's learning state wholesale, e.g. from a backup.
    pub fn restore(&self, tenant_id: &str, snapshot: &BanditSnapshot) -> BanditResult<LoadReport> {
        let slot = self.slot(tenant_id);
        let mut guard = slot.lock();
        let mut next = self.loaded(tenant_id, &mut guard, Access::Write)?.clone();

        let report = next.load_state(snapshot);
        self.commit_state(tenant_id, &mut guard, next)?;

        self.log_event(tenant_id, &BanditEvent::StateRestored {
            tenant_id: tenant_id.to_string(),
            version:   guard.version,
            dropped:   report.dropped.clone(),
            missing:   report.missing.clone(),
        });
        Ok(report)
    }

    /// Drop the tenant's cached and stored state. The next call starts fresh.
    pub fn evict(&self, tenant_id: &str) -> BanditResult<bool> {
        self.tenants.remove(tenant_id);
        let removed = self.store.evict_tenant(tenant_id)?;
        log::info!("engine: tenant={tenant_id} evicted (stored state removed={removed})");
        Ok(removed)
    }

    // ── Internals ──────────────────────────────────────────────

    fn slot(&self, tenant_id: &str) -> Arc<Mutex<TenantSlot>> {
        // Clone the Arc out so the map shard is not held while the tenant lock is.
        self.tenants
            .entry(tenant_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn loaded<'a>(
        &self,
        tenant_id: &str,
        slot: &'a mut TenantSlot,
        access: Access,
    ) -> BanditResult<&'a mut OfferBandit> {
        let bandit = match slot.bandit.take() {
            Some(b) => b,
            None => {
                let (b, version, event) = self.restore_from_store(tenant_id)?;
                slot.version = version;
                slot.pending = Some(event);
                b
            }
        };
        if access == Access::Write {
            if let Some(event) = slot.pending.take() {
                self.log_event(tenant_id, &event);
            }
        }
        Ok(slot.bandit.insert(bandit))
    }

    fn restore_from_store(&self, tenant_id: &str) -> BanditResult<(OfferBandit, u64, BanditEvent)> {
        let mut bandit = OfferBandit::new(
            self.arms.clone(),
            self.config.params.clone(),
            TenantRng::for_tenant(self.config.master_seed, tenant_id),
        )?;

        match self.store.load_snapshot(tenant_id)? {
            Some(stored) => {
                let report = bandit.load_state(&stored.snapshot);
                log::info!(
                    "engine: tenant={tenant_id} restored at version {} ({} selections)",
                    stored.version,
                    bandit.total_selections()
                );
                let event = BanditEvent::StateRestored {
                    tenant_id: tenant_id.to_string(),
                    version:   stored.version,
                    dropped:   report.dropped,
                    missing:   report.missing,
                };
                Ok((bandit, stored.version, event))
            }
            None => {
                log::info!("engine: tenant={tenant_id} initialized with {} arms", self.arms.len());
                let event = BanditEvent::TenantInitialized {
                    tenant_id: tenant_id.to_string(),
                    arm_count: self.arms.len(),
                };
                Ok((bandit, 0, event))
            }
        }
    }

    fn scheduled_decay(&self, bandit: &mut OfferBandit) -> Option<(f64, f64)> {
        let every = self.config.params.decay_every?;
        if bandit.total_selections() % every != 0 {
            return None;
        }
        let from = bandit.epsilon();
        let to = bandit.decay_epsilon(self.config.params.decay_rate);
        Some((from, to))
    }

    fn commit_state(&self, tenant_id: &str, slot: &mut TenantSlot, next: OfferBandit) -> BanditResult<()> {
        match self.store.save_snapshot(tenant_id, &next.get_state(), slot.version) {
            Ok(version) => {
                slot.version = version;
                slot.bandit = Some(next);
                Ok(())
            }
            Err(e) => {
                if matches!(e, BanditError::VersionConflict { .. }) {
                    slot.invalidate();
                }
                Err(e)
            }
        }
    }

    fn log_event(&self, tenant_id: &str, event: &BanditEvent) {
        let appended = EventLogEntry::from_event(tenant_id, Utc::now(), event)
            .map_err(BanditError::from)
            .and_then(|entry| self.store.append_event(&entry));
        if let Err(e) = appended {
            log::warn!("engine: tenant={tenant_id} {} not logged: {e}", event.type_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_updates_keep_their_reason() {
        assert_eq!(OutcomeStatus::from_update(&UpdateOutcome::UnknownArm), OutcomeStatus::UnknownArm);
        assert_eq!(
            OutcomeStatus::from_update(&UpdateOutcome::NonFiniteReward),
            OutcomeStatus::NonFiniteReward
        );
        let applied = UpdateOutcome::Applied { index: 0, new_estimate: 0.1, count: 1 };
        assert_eq!(OutcomeStatus::from_update(&applied), OutcomeStatus::Applied);
    }
}
